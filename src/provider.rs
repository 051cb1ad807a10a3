use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ProviderError;

pub const DEFAULT_PROVIDER_INSTANCES: [&str; 4] = [
    "https://cobalt-api.kwiatekmiki.com",
    "https://cobalt-api.meowing.de",
    "https://capi.3kh0.net",
    "https://cobalt-backend.canine.tools",
];

const FILENAME_STYLE: &str = "basic";
const AUDIO_FORMAT: &str = "mp3";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    pub url: String,
    pub video_quality: &'static str,
    pub audio_format: &'static str,
    pub download_mode: &'static str,
    pub filename_style: &'static str,
}

pub fn map_quality(quality: &str) -> &'static str {
    match quality {
        "4k" => "2160",
        "1080" => "1080",
        "720" => "720",
        _ => "480",
    }
}

pub fn map_download_mode(format: &str) -> &'static str {
    if format == "mp3" { "audio" } else { "auto" }
}

pub fn build_provider_request(url: &str, quality: &str, format: &str) -> ProviderRequest {
    ProviderRequest {
        url: url.to_string(),
        video_quality: map_quality(quality),
        audio_format: AUDIO_FORMAT,
        download_mode: map_download_mode(format),
        filename_style: FILENAME_STYLE,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderPayload {
    pub status: Option<String>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub picker: Option<Vec<ProviderPickerItem>>,
    pub error: Option<serde_json::Value>,
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderPickerItem {
    pub url: Option<String>,
    pub thumb: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerItem {
    pub url: String,
    pub thumbnail: Option<String>,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReply {
    Error {
        code: String,
    },
    Picker {
        items: Vec<PickerItem>,
        thumbnail: Option<String>,
    },
    Direct {
        url: String,
        filename: Option<String>,
        thumbnail: Option<String>,
    },
    Unrecognized {
        status: Option<String>,
    },
}

impl From<ProviderPayload> for ProviderReply {
    fn from(payload: ProviderPayload) -> Self {
        let status = payload.status.as_deref().map(str::to_ascii_lowercase);

        if status.as_deref() == Some("error") {
            return ProviderReply::Error {
                code: error_code(payload.error.as_ref()),
            };
        }

        if status.as_deref() == Some("picker") {
            let items: Vec<PickerItem> = payload
                .picker
                .unwrap_or_default()
                .into_iter()
                .filter_map(|item| {
                    let url = item.url.and_then(non_empty_owned)?;
                    Some(PickerItem {
                        url,
                        thumbnail: item.thumb.and_then(non_empty_owned),
                        kind: item
                            .kind
                            .and_then(non_empty_owned)
                            .unwrap_or_else(|| "video".to_string()),
                    })
                })
                .collect();

            if !items.is_empty() {
                return ProviderReply::Picker {
                    items,
                    thumbnail: payload.thumb.and_then(non_empty_owned),
                };
            }
        }

        // tunnel, redirect and the legacy shape all carry a top-level url
        match payload.url.and_then(non_empty_owned) {
            Some(url) => ProviderReply::Direct {
                url,
                filename: payload.filename.and_then(non_empty_owned),
                thumbnail: payload.thumb.and_then(non_empty_owned),
            },
            None => ProviderReply::Unrecognized {
                status: payload.status,
            },
        }
    }
}

impl ProviderReply {
    pub fn into_resolved(self) -> Result<Resolved, ProviderError> {
        match self {
            ProviderReply::Picker { items, thumbnail } => Ok(Resolved::Picker { items, thumbnail }),
            ProviderReply::Direct {
                url,
                filename,
                thumbnail,
            } => Ok(Resolved::Direct {
                url,
                filename,
                thumbnail,
            }),
            ProviderReply::Error { code } => Err(ProviderError::Rejected(code)),
            ProviderReply::Unrecognized { status } => Err(ProviderError::Malformed(format!(
                "status {:?} without url or picker items",
                status.unwrap_or_default()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Picker {
        items: Vec<PickerItem>,
        thumbnail: Option<String>,
    },
    Direct {
        url: String,
        filename: Option<String>,
        thumbnail: Option<String>,
    },
}

fn error_code(error: Option<&serde_json::Value>) -> String {
    match error {
        Some(serde_json::Value::String(code)) => code.clone(),
        Some(value) => value
            .get("code")
            .and_then(|code| code.as_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string()),
        None => "unknown".to_string(),
    }
}

fn non_empty_owned(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn attempt(
        &self,
        endpoint: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderReply, ProviderError>;
}

pub struct CobaltProvider {
    client: reqwest::Client,
}

impl CobaltProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Provider for CobaltProvider {
    async fn attempt(
        &self,
        endpoint: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderReply, ProviderError> {
        let response = self
            .client
            .post(endpoint)
            .header(ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let payload = response
            .json::<ProviderPayload>()
            .await
            .map_err(|error| ProviderError::Malformed(format!("invalid JSON body: {error}")))?;

        Ok(ProviderReply::from(payload))
    }
}

// Endpoints are tried strictly in order; the first usable reply wins.
#[derive(Clone)]
pub struct FallbackChain {
    endpoints: Arc<Vec<String>>,
    provider: Arc<dyn Provider>,
}

impl FallbackChain {
    pub fn new(endpoints: Vec<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            provider,
        }
    }

    pub async fn resolve(&self, request: &ProviderRequest) -> Result<Resolved, ProviderError> {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            info!(
                "Trying provider instance {}/{}: {endpoint}",
                index + 1,
                self.endpoints.len()
            );

            let outcome = self
                .provider
                .attempt(endpoint, request)
                .await
                .and_then(ProviderReply::into_resolved);

            match outcome {
                Ok(resolved) => {
                    info!("Provider instance {endpoint} resolved {:?}", request.url);
                    return Ok(resolved);
                }
                Err(error) => {
                    warn!("Provider instance {endpoint} failed: {error}");
                }
            }
        }

        warn!(
            "All {} provider instance(s) failed for {:?}",
            self.endpoints.len(),
            request.url
        );
        Err(ProviderError::Exhausted {
            attempts: self.endpoints.len(),
        })
    }
}
