use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    access::{
        AccessService, DonationPayload, Verification, VerifyRequest, VerifyResponse, WebhookAuth,
        authenticate_webhook,
    },
    config::non_empty,
    error::ApiError,
    normalize::{DownloadContext, UnifiedResult, normalize},
    platform::{detect_platform, extract_url_metadata},
    provider::{FallbackChain, build_provider_request},
};

pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

const DEFAULT_QUALITY: &str = "1080";
const DEFAULT_FORMAT: &str = "mp4";
const PRIVILEGED_QUALITY: &str = "4k";

#[derive(Clone)]
pub struct AppState {
    pub chain: FallbackChain,
    pub access: AccessService,
    pub webhook_secret: Option<Arc<str>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    pub quality: Option<String>,
    pub format: Option<String>,
    #[serde(default)]
    pub preview_only: bool,
    pub access_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/download", post(download))
        .route("/api/download-video", post(download))
        .route("/api/verify-token", post(verify_token))
        .route("/api/donation-webhook", post(donation_webhook))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }

    let Some(platform) = detect_platform(url) else {
        return Err(ApiError::bad_request(
            "Platform not supported. Use a TikTok, Instagram, Facebook, or YouTube URL.",
        ));
    };

    let quality = payload
        .quality
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(DEFAULT_QUALITY)
        .to_ascii_lowercase();
    let format = payload
        .format
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(DEFAULT_FORMAT)
        .to_ascii_lowercase();

    if !payload.preview_only && quality == PRIVILEGED_QUALITY {
        let token = payload.access_token.as_deref().or_else(|| {
            headers
                .get(ACCESS_TOKEN_HEADER)
                .and_then(|value| value.to_str().ok())
        });
        let allowed = state.access.has_access(token).await.map_err(|error| {
            error!("Could not check 4K access: {error}");
            ApiError::internal("Could not verify 4K access right now.")
        })?;
        if !allowed {
            return Err(ApiError::forbidden(
                "4K downloads require a verified donation token.",
            ));
        }
    }

    info!(
        "Processing download for {url:?} platform={platform} quality={quality} format={format} preview={}",
        payload.preview_only
    );

    let context = DownloadContext {
        source_url: url.to_string(),
        platform,
        url_metadata: extract_url_metadata(url, platform),
        quality,
        format,
        preview_only: payload.preview_only,
    };
    let request = build_provider_request(url, &context.quality, &context.format);

    match state.chain.resolve(&request).await {
        Ok(resolved) => Ok(Json(normalize(resolved, &context)).into_response()),
        Err(error) => {
            warn!("Download failed for {url:?}: {error}");
            let result = UnifiedResult::failure(
                &context,
                "Could not process this video right now. Try again later or use a different URL.",
            );
            Ok((StatusCode::BAD_GATEWAY, Json(result)).into_response())
        }
    }
}

async fn verify_token(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Response, ApiError> {
    let verification = state.access.verify(payload).await.map_err(|error| {
        error!("Could not verify access: {error}");
        ApiError::internal("Could not verify access right now.")
    })?;

    match verification {
        Verification::Checked(response) => Ok(Json(response).into_response()),
        Verification::MissingCredential => Ok((
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse {
                valid: false,
                message: "Token or transaction_id is required".to_string(),
                token: None,
                supporter_name: None,
            }),
        )
            .into_response()),
    }
}

async fn donation_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    match authenticate_webhook(state.webhook_secret.as_deref(), &headers, &body) {
        WebhookAuth::Accepted => {}
        WebhookAuth::Disabled => {
            warn!("Donation webhook called but WEBHOOK_SECRET is not configured.");
            return Err(ApiError::unavailable("Donation webhook is not configured."));
        }
        WebhookAuth::Rejected => {
            warn!("Donation webhook rejected: missing or invalid credential.");
            return Err(ApiError::unauthorized("Invalid webhook credential."));
        }
    }

    let payload: DonationPayload = serde_json::from_slice(&body).map_err(|error| {
        warn!("Donation webhook body is not valid JSON: {error}");
        ApiError::bad_request("Invalid donation payload.")
    })?;

    let response = state.access.record_donation(payload).await.map_err(|error| {
        error!("Could not store donation: {error}");
        ApiError::internal("Could not store the donation.")
    })?;

    Ok(Json(response).into_response())
}
