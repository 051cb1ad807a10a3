use std::{collections::HashSet, path::PathBuf, sync::Arc};

use axum::http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};
use url::Url;

use crate::{provider::DEFAULT_PROVIDER_INSTANCES, routes::ACCESS_TOKEN_HEADER};

const DEFAULT_PROVIDER_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://127.0.0.1:5173", "http://localhost:5173"];

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub provider_instances: Vec<String>,
    pub provider_timeout_seconds: u64,
    pub data_dir: PathBuf,
    pub webhook_secret: Option<String>,
    pub access_token_ttl_days: Option<i64>,
}

impl Config {
    pub fn from_env() -> Self {
        let provider_instances = read_list_env("PROVIDER_INSTANCES");
        let provider_instances = if provider_instances.is_empty() {
            DEFAULT_PROVIDER_INSTANCES
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            provider_instances
        };

        Self {
            bind_addr: resolve_bind_addr(),
            allowed_origins: read_list_env("ALLOWED_ORIGINS"),
            provider_instances,
            provider_timeout_seconds: read_u64_env("PROVIDER_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECONDS),
            data_dir: std::env::var("DATA_DIR")
                .ok()
                .and_then(|value| non_empty(&value).map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .ok()
                .and_then(|value| non_empty(&value).map(ToString::to_string)),
            access_token_ttl_days: read_u64_env("ACCESS_TOKEN_TTL_DAYS")
                .filter(|value| *value > 0)
                .and_then(|value| i64::try_from(value).ok()),
        }
    }
}

pub fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn read_list_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, String> {
    let origins: Vec<String> = if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Falling back to development origins.");
        DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(ToString::to_string)
            .collect()
    } else {
        configured.to_vec()
    };

    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                )
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!("CORS allow-list loaded with {} origin(s)", allowed_origins.len());

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(ACCESS_TOKEN_HEADER)]))
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    let port = parsed.port();

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match port {
        Some(explicit) if explicit != default_port => Some(format!("{scheme}://{host}:{explicit}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
