use super::{make_record, SourceResponse, VulnSource, SUMMARY_LIMIT};
use crate::config::Config;
use crate::governor::RateGovernor;
use crate::http::{RetryPolicy, SourceClient};
use crate::types::{SourceId, SourceQuery, VulnerabilityRecord};
use crate::Result;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::sync::Arc;

/// Unauthenticated CIRCL CVE search by product and version.
pub struct CirclSource {
    client: SourceClient,
    url: String,
    summary_limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CirclResponse {
    List(Vec<CirclItem>),
    Envelope {
        results: Vec<CirclItem>,
    },
    Empty(Option<()>),
}

#[derive(Debug, Deserialize)]
struct CirclItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    cvss: Option<CirclScore>,
}

/// CIRCL publishes scores both as JSON numbers and as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CirclScore {
    Number(f64),
    Text(String),
}

impl CirclScore {
    fn value(&self) -> f64 {
        match self {
            CirclScore::Number(n) => *n,
            CirclScore::Text(s) => s.trim().parse().unwrap_or(0.0),
        }
    }
}

impl CirclSource {
    pub fn new(client: SourceClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            summary_limit: SUMMARY_LIMIT,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let retry = RetryPolicy {
            max_attempts: config.retry.max_attempts,
            initial_backoff: config.initial_backoff(),
        };
        let client = SourceClient::new(
            SourceId::Circl.to_string(),
            config.circl_timeout(),
            &config.correlation.user_agent,
            retry,
        )?;

        Ok(Self::new(client, config.sources.circl.url.clone()).with_summary_limit(config.correlation.summary_limit))
    }

    pub fn with_summary_limit(mut self, limit: usize) -> Self {
        self.summary_limit = limit;
        self
    }

    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.client = self.client.with_governor(governor);
        self
    }

    async fn lookup(&self, query: &SourceQuery) -> Result<Vec<VulnerabilityRecord>> {
        let mut params = vec![("product", query.product.clone())];
        if !query.version.is_empty() {
            params.push(("version", query.version.clone()));
        }

        let response: CirclResponse = self.client.get_json(&self.url, &params, HeaderMap::new()).await?;
        Ok(map_response(response, self.summary_limit))
    }
}

/// Parse a raw CIRCL body.
pub fn parse_circl_body(body: &str, summary_limit: usize) -> Result<Vec<VulnerabilityRecord>> {
    let response: CirclResponse = serde_json::from_str(body)?;
    Ok(map_response(response, summary_limit))
}

fn map_response(response: CirclResponse, summary_limit: usize) -> Vec<VulnerabilityRecord> {
    let items = match response {
        CirclResponse::List(items) => items,
        CirclResponse::Envelope { results } => results,
        CirclResponse::Empty(_) => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            let score = item.cvss.as_ref().map(CirclScore::value).unwrap_or(0.0);
            make_record(
                SourceId::Circl,
                item.id.as_deref().unwrap_or_default(),
                item.summary.as_deref().unwrap_or_default(),
                score,
                summary_limit,
            )
        })
        .collect()
}

#[async_trait]
impl VulnSource for CirclSource {
    fn id(&self) -> SourceId {
        SourceId::Circl
    }

    async fn query(&self, query: &SourceQuery) -> SourceResponse {
        SourceResponse::from_result(SourceId::Circl, query, self.lookup(query).await)
    }
}
