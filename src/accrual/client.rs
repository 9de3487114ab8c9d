use std::time::Duration;

use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::{AccrualStatus, OrderAccrual, OrderStatus};

// ============================================================================
// Accrual Oracle Client
// ============================================================================
//
// Thin HTTP client for GET {base_url}/api/orders/{number}. The oracle answers
// with a JSON body on 2xx, or with bare status codes used as control signals:
// 204 (nothing computed yet), 429 (back off for Retry-After seconds),
// 500 (oracle unavailable). Those signals are modeled as response variants,
// not errors; the worker decides what to do with each.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle reply for order {number} is malformed: {reason}")]
    Decode { number: i64, reason: String },

    #[error("rate limited without a usable Retry-After header")]
    BadRetryAfter,

    #[error("unexpected oracle status code: {0}")]
    UnexpectedStatus(StatusCode),
}

/// Interpreted oracle answer for one order.
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualResponse {
    /// 2xx with a decoded body.
    Ready(OrderAccrual),
    /// 204: the oracle has not computed anything for this order yet.
    NotReady,
    /// 429: back off for the given duration before the next query.
    RateLimited(Duration),
    /// 500: the oracle is having a bad day.
    Unavailable,
}

/// Wire shape of a 2xx reply. The oracle serializes order numbers as decimal
/// strings, and omits `accrual` for anything it has not finished processing.
#[derive(Debug, Deserialize)]
struct AccrualReply {
    order: String,
    status: AccrualStatus,
    #[serde(default)]
    accrual: Option<Decimal>,
}

#[derive(Clone)]
pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl AccrualClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccrualError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Query the oracle for one order number.
    pub async fn order_accrual(&self, number: i64) -> Result<AccrualResponse, AccrualError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(AccrualResponse::NotReady),
            StatusCode::TOO_MANY_REQUESTS => {
                let seconds = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .ok_or(AccrualError::BadRetryAfter)?;

                Ok(AccrualResponse::RateLimited(Duration::from_secs(seconds)))
            }
            StatusCode::INTERNAL_SERVER_ERROR => Ok(AccrualResponse::Unavailable),
            status if status.is_success() => {
                let body = response.text().await?;
                let reply: AccrualReply =
                    serde_json::from_str(&body).map_err(|e| AccrualError::Decode {
                        number,
                        reason: e.to_string(),
                    })?;

                let decoded_number = reply.order.parse().map_err(|_| AccrualError::Decode {
                    number,
                    reason: format!("order field {:?} is not a number", reply.order),
                })?;

                let status = OrderStatus::from(reply.status);
                // The amount only means something once processing finished.
                let accrual = if status == OrderStatus::Processed {
                    reply.accrual.unwrap_or_default()
                } else {
                    Decimal::ZERO
                };

                Ok(AccrualResponse::Ready(OrderAccrual {
                    number: decoded_number,
                    status,
                    accrual,
                }))
            }
            status => Err(AccrualError::UnexpectedStatus(status)),
        }
    }
}
