use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::non_empty,
    error::StoreError,
    store::{AccessStore, NewAccessToken, NewDonation},
};

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

const DEFAULT_SUPPORTER_NAME: &str = "Anonymous";
const DEFAULT_UNIT: &str = "gulali";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct DonationPayload {
    pub supporter_name: Option<String>,
    pub supporter_email: Option<String>,
    pub unit: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub supporter_message: Option<String>,
    pub transaction_id: Option<String>,
    pub net_amount: Option<f64>,
}

impl DonationPayload {
    pub fn amount(&self) -> f64 {
        self.net_amount
            .unwrap_or_else(|| self.price.unwrap_or(0.0) * self.quantity.unwrap_or(1.0))
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct VerifyRequest {
    pub token: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct VerifyResponse {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supporter_name: Option<String>,
}

impl VerifyResponse {
    fn invalid(message: &str) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
            token: None,
            supporter_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    MissingCredential,
    Checked(VerifyResponse),
}

#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn AccessStore>,
    token_ttl: Option<Duration>,
}

impl AccessService {
    pub fn new(store: Arc<dyn AccessStore>, token_ttl: Option<Duration>) -> Self {
        Self { store, token_ttl }
    }

    // A redelivered order_id is reported as already processed.
    pub async fn record_donation(
        &self,
        payload: DonationPayload,
    ) -> Result<WebhookResponse, StoreError> {
        let order_id = payload
            .transaction_id
            .as_deref()
            .and_then(non_empty)
            .map(ToString::to_string);
        if order_id.is_none() {
            warn!("Donation webhook without transaction_id; it cannot be verified later.");
        }

        let supporter_email = payload
            .supporter_email
            .as_deref()
            .and_then(non_empty)
            .map(ToString::to_string);
        let donation = NewDonation {
            supporter_name: payload
                .supporter_name
                .as_deref()
                .and_then(non_empty)
                .unwrap_or(DEFAULT_SUPPORTER_NAME)
                .to_string(),
            supporter_email: supporter_email.clone(),
            amount: payload.amount(),
            message: payload.supporter_message.clone(),
            order_id,
            unit: payload
                .unit
                .as_deref()
                .and_then(non_empty)
                .unwrap_or(DEFAULT_UNIT)
                .to_string(),
        };

        let record = match self.store.insert_donation(donation).await {
            Ok(record) => record,
            Err(StoreError::Conflict { .. }) => {
                info!(
                    "Donation {:?} was already processed; ignoring redelivery.",
                    payload.transaction_id
                );
                return Ok(WebhookResponse {
                    success: true,
                    message: "Donation already processed".to_string(),
                    token: None,
                });
            }
            Err(error) => return Err(error),
        };
        info!("Donation {} stored for order {:?}", record.id, record.order_id);

        let minted = self
            .store
            .insert_access_token(NewAccessToken {
                token: Uuid::new_v4().to_string(),
                email: supporter_email,
                donation_id: Some(record.id),
                expires_at: self.token_ttl.map(|ttl| Utc::now() + ttl),
            })
            .await;

        let token = match minted {
            Ok(access_token) => {
                info!("Access token {} minted for donation {}", access_token.id, record.id);
                Some(access_token.token)
            }
            Err(error) => {
                error!("Could not mint access token for donation {}: {error}", record.id);
                None
            }
        };

        Ok(WebhookResponse {
            success: true,
            message: "Donation verified".to_string(),
            token,
        })
    }

    pub async fn verify(&self, request: VerifyRequest) -> Result<Verification, StoreError> {
        let now = Utc::now();

        if let Some(transaction_id) = request.transaction_id.as_deref().and_then(non_empty) {
            let Some(donation) = self.store.find_donation_by_order_id(transaction_id).await? else {
                info!("No donation found for transaction_id {transaction_id:?}");
                return Ok(Verification::Checked(VerifyResponse::invalid(
                    "Donation not found. Make sure the transaction_id is correct.",
                )));
            };

            let Some(access_token) = self.store.latest_token_for_donation(donation.id, now).await?
            else {
                info!("Donation {} has no valid access token", donation.id);
                return Ok(Verification::Checked(VerifyResponse::invalid(
                    "Access token not found or expired.",
                )));
            };

            return Ok(Verification::Checked(VerifyResponse {
                valid: true,
                message: "Donation verified! 4K access is active.".to_string(),
                token: Some(access_token.token),
                supporter_name: Some(donation.supporter_name),
            }));
        }

        let Some(token) = request.token.as_deref().and_then(non_empty) else {
            return Ok(Verification::MissingCredential);
        };

        if self.store.find_valid_token(token, now).await?.is_some() {
            Ok(Verification::Checked(VerifyResponse {
                valid: true,
                message: "Token valid".to_string(),
                token: None,
                supporter_name: None,
            }))
        } else {
            info!("Access token not found or expired");
            Ok(Verification::Checked(VerifyResponse::invalid(
                "Token invalid or expired",
            )))
        }
    }

    pub async fn has_access(&self, token: Option<&str>) -> Result<bool, StoreError> {
        let Some(token) = token.and_then(non_empty) else {
            return Ok(false);
        };
        Ok(self.store.find_valid_token(token, Utc::now()).await?.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAuth {
    Accepted,
    Rejected,
    Disabled,
}

/// Accepts either the shared token header or an HMAC-SHA256 signature of
/// the raw body. Without a configured secret nothing is accepted.
pub fn authenticate_webhook(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> WebhookAuth {
    let Some(secret) = secret else {
        return WebhookAuth::Disabled;
    };

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(token) = header(WEBHOOK_TOKEN_HEADER)
        && constant_time_eq(token.as_bytes(), secret.as_bytes())
    {
        return WebhookAuth::Accepted;
    }

    if let Some(signature) = header(WEBHOOK_SIGNATURE_HEADER)
        && signature_matches(secret, signature, body)
    {
        return WebhookAuth::Accepted;
    }

    WebhookAuth::Rejected
}

pub fn sign_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn signature_matches(secret: &str, signature: &str, body: &[u8]) -> bool {
    let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
