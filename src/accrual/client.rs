//! HTTP accrual client
//!
//! `GET {base}/api/orders/{number}` against the accrual service.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AccrualError, AccrualReply, AccrualSource};
use crate::order::{AccrualOutcome, OrderNumber};

/// Wait applied when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Shortest backoff honoured, so `Retry-After: 0` still pauses the cycle
pub const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Accrual service response body
#[derive(Debug, Deserialize)]
struct AccrualResponse {
    order: String,
    status: String,
    /// serde_json holds this as an f64; its shortest decimal form is parsed,
    /// so amounts with up to 15 significant digits come through exactly
    #[serde(default)]
    accrual: Option<serde_json::Number>,
}

/// reqwest-backed [`AccrualSource`]
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    /// Create a client for `base_url` with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccrualError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AccrualError::Config("accrual address is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccrualError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn order_url(&self, number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

#[async_trait]
impl AccrualSource for HttpAccrualClient {
    async fn fetch_outcome(&self, number: &OrderNumber) -> Result<AccrualReply, AccrualError> {
        let url = self.order_url(number);
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let outcome = decode_body(number, &body)?;
                debug!(number = %number, outcome = ?outcome, "Accrual outcome received");
                Ok(AccrualReply::Outcome(outcome))
            }
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!(number = %number, status = status.as_u16(), "Order not yet known upstream");
                Ok(AccrualReply::Outcome(AccrualOutcome::StillPending {
                    processing: false,
                }))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = retry_after(response.headers());
                warn!(number = %number, wait_secs = wait.as_secs(), "Accrual service rate limit");
                Ok(AccrualReply::RetryAfter(wait))
            }
            s if s.is_server_error() => Err(AccrualError::Unavailable(format!("HTTP {}", s))),
            s => Err(AccrualError::UnexpectedStatus(s.as_u16())),
        }
    }
}

/// Decode a 200 body for the order that was requested
fn decode_body(requested: &OrderNumber, body: &[u8]) -> Result<AccrualOutcome, AccrualError> {
    let response: AccrualResponse =
        serde_json::from_slice(body).map_err(|e| AccrualError::Decode(e.to_string()))?;

    if response.order.trim() != requested.as_str() {
        return Err(AccrualError::Decode(format!(
            "response is for order '{}', requested {}",
            response.order, requested
        )));
    }

    match response.status.as_str() {
        "REGISTERED" => Ok(AccrualOutcome::StillPending { processing: false }),
        "PROCESSING" => Ok(AccrualOutcome::StillPending { processing: true }),
        "INVALID" => Ok(AccrualOutcome::Invalid),
        "PROCESSED" => {
            let amount = match response.accrual {
                Some(raw) => parse_amount(&raw.to_string())?,
                None => Decimal::ZERO,
            };
            if amount < Decimal::ZERO {
                return Err(AccrualError::Decode(format!("negative accrual {}", amount)));
            }
            Ok(AccrualOutcome::Processed(amount))
        }
        other => Err(AccrualError::Decode(format!("unknown status '{}'", other))),
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, AccrualError> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| AccrualError::Decode(format!("accrual '{}': {}", raw, e)))
}

/// `Retry-After` in whole seconds, else [`DEFAULT_RETRY_AFTER`]
///
/// Never shorter than [`MIN_RETRY_AFTER`].
fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
        .max(MIN_RETRY_AFTER)
}
