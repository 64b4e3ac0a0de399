use crate::governor::RateGovernor;
use crate::{Result, ScanError};
use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Retry schedule for transient (5xx) upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// HTTP transport shared by the source adapters.
#[derive(Debug, Clone)]
pub struct SourceClient {
    name: String,
    client: Client,
    retry: RetryPolicy,
    governor: Option<Arc<RateGovernor>>,
}

impl SourceClient {
    pub fn new(name: impl Into<String>, timeout: Duration, user_agent: &str, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            name: name.into(),
            client,
            retry,
            governor: None,
        })
    }

    /// Route every attempt through `governor`.
    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn governor(&self) -> Option<&Arc<RateGovernor>> {
        self.governor.as_ref()
    }

    /// GET `url` and decode the JSON body into `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: HeaderMap,
    ) -> Result<T> {
        let body = self.get_bytes(url, query, headers).await?;
        serde_json::from_slice(&body).map_err(|e| ScanError::SourceMalformed {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })
    }

    async fn get_bytes(&self, url: &str, query: &[(&str, String)], headers: HeaderMap) -> Result<Vec<u8>> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;

        loop {
            let grant = match &self.governor {
                Some(governor) => Some(governor.acquire().await),
                None => None,
            };

            debug!("{}: GET {} (attempt {}/{})", self.name, url, attempt, max_attempts);
            let response = self
                .client
                .get(url)
                .query(query)
                .headers(headers.clone())
                .send()
                .await
                .map_err(|e| self.unavailable(describe_transport_error(&e)))?;

            let status = response.status();
            if status.is_success() {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| self.unavailable(describe_transport_error(&e)))?;
                return Ok(body.to_vec());
            }

            if status.is_server_error() && attempt < max_attempts {
                warn!(
                    "{}: HTTP {} on attempt {}/{}, retrying in {:?}",
                    self.name, status, attempt, max_attempts, backoff
                );
                drop(grant);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
                continue;
            }

            return Err(self.status_error(status));
        }
    }

    fn status_error(&self, status: StatusCode) -> ScanError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            ScanError::SourceRateLimited {
                source_name: self.name.clone(),
            }
        } else {
            self.unavailable(format!("HTTP {}", status))
        }
    }

    fn unavailable(&self, reason: String) -> ScanError {
        ScanError::SourceUnavailable {
            source_name: self.name.clone(),
            reason,
        }
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}
