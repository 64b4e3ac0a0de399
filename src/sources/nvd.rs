//! NVD (National Vulnerability Database) keyword search.
//!
//! Understands both the legacy 1.0 feed layout (`result.CVE_Items`) and the
//! 2.0 layout (`vulnerabilities[].cve`). One CVE usually carries several
//! scoring schemes (CVSS v2, v3.x, ...); the highest base score found is used
//! as the record's severity.

use super::{make_record, SourceResponse, VulnSource, SUMMARY_LIMIT};
use crate::config::Config;
use crate::governor::RateGovernor;
use crate::http::{RetryPolicy, SourceClient};
use crate::types::{SourceId, SourceQuery, VulnerabilityRecord};
use crate::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct NvdSource {
    client: SourceClient,
    url: String,
    keyword_param: String,
    results_per_page: u32,
    api_key: Option<String>,
    summary_limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NvdResponse {
    Legacy { result: LegacyResult },
    Current { vulnerabilities: Vec<CurrentItem> },
}

#[derive(Debug, Deserialize)]
struct LegacyResult {
    #[serde(rename = "CVE_Items", default)]
    items: Vec<LegacyItem>,
}

#[derive(Debug, Deserialize)]
struct LegacyItem {
    cve: LegacyCve,
    #[serde(default)]
    impact: BTreeMap<String, Metric>,
}

#[derive(Debug, Deserialize)]
struct LegacyCve {
    #[serde(rename = "CVE_data_meta", default)]
    meta: LegacyMeta,
    #[serde(default)]
    description: LegacyDescription,
    #[serde(default)]
    metrics: BTreeMap<String, Vec<Metric>>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyMeta {
    #[serde(rename = "ID", default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyDescription {
    #[serde(default)]
    description_data: Vec<Description>,
}

#[derive(Debug, Deserialize)]
struct CurrentItem {
    cve: CurrentCve,
}

#[derive(Debug, Deserialize)]
struct CurrentCve {
    #[serde(default)]
    id: String,
    #[serde(default)]
    descriptions: Vec<Description>,
    #[serde(default)]
    metrics: BTreeMap<String, Vec<Metric>>,
}

#[derive(Debug, Deserialize)]
struct Description {
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    value: String,
}

/// One scoring entry. NVD nests the base score at different depths
/// depending on feed version and scheme.
#[derive(Debug, Default, Deserialize)]
struct Metric {
    #[serde(rename = "baseScore", default)]
    base_score: Option<f64>,
    #[serde(rename = "cvssData", default)]
    cvss_data: Option<ScoreData>,
    #[serde(rename = "cvssV3", default)]
    cvss_v3: Option<ScoreData>,
    #[serde(rename = "cvssV2", default)]
    cvss_v2: Option<ScoreData>,
}

#[derive(Debug, Default, Deserialize)]
struct ScoreData {
    #[serde(rename = "baseScore", default)]
    base_score: Option<f64>,
}

impl Metric {
    fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.base_score
            .into_iter()
            .chain([&self.cvss_data, &self.cvss_v3, &self.cvss_v2].into_iter().flat_map(|data| {
                data.as_ref().and_then(|d| d.base_score)
            }))
    }
}

/// Highest score in encounter order; the first maximum wins ties. 0.0 when none.
pub fn max_score<I: IntoIterator<Item = f64>>(scores: I) -> f64 {
    scores
        .into_iter()
        .filter(|s| !s.is_nan())
        .fold(None, |best: Option<f64>, score| match best {
            Some(current) if score <= current => Some(current),
            _ => Some(score),
        })
        .unwrap_or(0.0)
}

impl NvdSource {
    pub fn new(client: SourceClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            keyword_param: "keyword".to_string(),
            results_per_page: 20,
            api_key: None,
            summary_limit: SUMMARY_LIMIT,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let nvd = &config.sources.nvd;
        let retry = RetryPolicy {
            max_attempts: config.retry.max_attempts,
            initial_backoff: config.initial_backoff(),
        };
        let client = SourceClient::new(
            SourceId::Nvd.to_string(),
            config.nvd_timeout(),
            &config.correlation.user_agent,
            retry,
        )?;

        let mut source = Self::new(client, nvd.url.clone())
            .with_keyword_param(nvd.keyword_param.clone())
            .with_results_per_page(nvd.results_per_page)
            .with_summary_limit(config.correlation.summary_limit);
        source.api_key = config.nvd_api_key();
        Ok(source)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_keyword_param(mut self, param: impl Into<String>) -> Self {
        self.keyword_param = param.into();
        self
    }

    pub fn with_results_per_page(mut self, count: u32) -> Self {
        self.results_per_page = count;
        self
    }

    pub fn with_summary_limit(mut self, limit: usize) -> Self {
        self.summary_limit = limit;
        self
    }

    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.client = self.client.with_governor(governor);
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            match HeaderValue::from_str(key) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static("apikey"), value);
                }
                Err(_) => log::warn!("NVD: ignoring API key with invalid header characters"),
            }
        }
        headers
    }

    async fn lookup(&self, query: &SourceQuery) -> Result<Vec<VulnerabilityRecord>> {
        let params = [
            (self.keyword_param.as_str(), query.keyword()),
            ("resultsPerPage", self.results_per_page.to_string()),
        ];

        let response: NvdResponse = self.client.get_json(&self.url, &params, self.headers()).await?;
        Ok(map_response(response, self.summary_limit))
    }
}

/// Parse a raw NVD body.
pub fn parse_nvd_body(body: &str, summary_limit: usize) -> Result<Vec<VulnerabilityRecord>> {
    let response: NvdResponse = serde_json::from_str(body)?;
    Ok(map_response(response, summary_limit))
}

fn map_response(response: NvdResponse, summary_limit: usize) -> Vec<VulnerabilityRecord> {
    match response {
        NvdResponse::Legacy { result } => result
            .items
            .into_iter()
            .filter_map(|item| {
                let score = max_score(
                    item.cve
                        .metrics
                        .values()
                        .flatten()
                        .chain(item.impact.values())
                        .flat_map(Metric::scores),
                );
                let summary = item
                    .cve
                    .description
                    .description_data
                    .first()
                    .map(|d| d.value.as_str())
                    .unwrap_or_default();
                make_record(SourceId::Nvd, &item.cve.meta.id, summary, score, summary_limit)
            })
            .collect(),
        NvdResponse::Current { vulnerabilities } => vulnerabilities
            .into_iter()
            .filter_map(|item| {
                let cve = item.cve;
                let score = max_score(cve.metrics.values().flatten().flat_map(Metric::scores));
                let summary = cve
                    .descriptions
                    .iter()
                    .find(|d| d.lang.as_deref() == Some("en"))
                    .or_else(|| cve.descriptions.first())
                    .map(|d| d.value.as_str())
                    .unwrap_or_default();
                make_record(SourceId::Nvd, &cve.id, summary, score, summary_limit)
            })
            .collect(),
    }
}

#[async_trait]
impl VulnSource for NvdSource {
    fn id(&self) -> SourceId {
        SourceId::Nvd
    }

    async fn query(&self, query: &SourceQuery) -> SourceResponse {
        SourceResponse::from_result(SourceId::Nvd, query, self.lookup(query).await)
    }
}
