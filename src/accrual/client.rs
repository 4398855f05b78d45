//! HTTP client for the accrual authority
//!
//! `GET {base}/api/orders/{number}`. A 429 is retried after the
//! server-supplied `Retry-After` (seconds), up to `max_attempts` requests in
//! total; any other non-200 status is a hard failure for this cycle.

use super::AccrualAuthority;
use super::error::AuthorityError;
use super::verdict::Verdict;
use crate::order_number::OrderNumber;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_address: String,
    /// Total requests per query, the first one included
    pub max_attempts: u32,
    /// Wait used when a 429 has no parseable `Retry-After`
    pub default_retry_after: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_address: "http://localhost:8080".to_string(),
            max_attempts: 3,
            default_retry_after: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

enum Attempt {
    Verdict(Verdict),
    RateLimited(Duration),
}

pub struct HttpAccrualClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpAccrualClient {
    pub fn new(config: ClientConfig) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn order_url(&self, number: OrderNumber) -> String {
        format!(
            "{}/api/orders/{}",
            self.config.base_address.trim_end_matches('/'),
            number
        )
    }

    async fn fetch_once(&self, url: &str) -> Result<Attempt, AuthorityError> {
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let verdict = serde_json::from_slice(&body)
                    .map_err(|e| AuthorityError::Malformed(e.to_string()))?;
                Ok(Attempt::Verdict(verdict))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = retry_after(response.headers()).unwrap_or(self.config.default_retry_after);
                Ok(Attempt::RateLimited(wait))
            }
            status => Err(AuthorityError::UnexpectedStatus(status.as_u16())),
        }
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are not used by the authority.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl AccrualAuthority for HttpAccrualClient {
    async fn query_verdict(
        &self,
        number: OrderNumber,
        shutdown: &Shutdown,
    ) -> Result<Verdict, AuthorityError> {
        let url = self.order_url(number);
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => return Err(AuthorityError::Cancelled),
                outcome = self.fetch_once(&url) => outcome?,
            };

            let wait = match outcome {
                Attempt::Verdict(verdict) => {
                    debug!(order = %number, status = ?verdict.status, attempt, "Verdict received");
                    return Ok(verdict);
                }
                Attempt::RateLimited(wait) => wait,
            };

            if attempt == max_attempts {
                break;
            }

            warn!(
                order = %number,
                attempt,
                retry_after_ms = wait.as_millis() as u64,
                "Accrual authority rate limited, backing off"
            );
            tokio::select! {
                biased;
                _ = shutdown.triggered() => return Err(AuthorityError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Err(AuthorityError::RateLimited {
            attempts: max_attempts,
        })
    }
}
