//! Vulnerability correlation engine.
//!
//! Queries every configured source for one service concurrently, then merges
//! the answers in the fixed source precedence order:
//!
//! 1. concatenate per-source record lists in precedence order
//! 2. drop repeated identifiers, keeping the first occurrence
//! 3. stable sort by score, highest first
//! 4. truncate to the configured maximum

use crate::config::{Config, SourceKind};
use crate::governor::RateGovernor;
use crate::sources::{CirclSource, NvdSource, SourceResponse, SourceStatus, VulnSource};
use crate::types::{AggregatedResult, SourceId, SourceQuery, VulnerabilityRecord};
use crate::Result;
use futures::future::join_all;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Default cap on records per service.
pub const MAX_RESULTS: usize = 15;

pub struct CorrelationEngine {
    sources: Vec<Arc<dyn VulnSource>>,
    max_results: usize,
}

/// Engine output together with how each source fared.
#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    pub result: AggregatedResult,
    pub statuses: Vec<(SourceId, SourceStatus)>,
}

impl CorrelationOutcome {
    pub fn failed_sources(&self) -> Vec<SourceId> {
        self.statuses
            .iter()
            .filter(|(_, status)| !status.is_ok())
            .map(|(source, _)| *source)
            .collect()
    }
}

impl CorrelationEngine {
    /// Sources are consulted, and take precedence, in the given order.
    pub fn new(sources: Vec<Arc<dyn VulnSource>>) -> Self {
        Self {
            sources,
            max_results: MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Build the enabled sources in configured order, each with its own governor.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut sources: Vec<Arc<dyn VulnSource>> = Vec::new();
        let mut seen = HashSet::new();

        for kind in &config.sources.order {
            if !seen.insert(*kind) {
                continue;
            }
            match kind {
                SourceKind::Circl if config.sources.circl.enabled => {
                    let circl = &config.sources.circl;
                    let mut source = CirclSource::from_config(config)?;
                    if let Some(governor) = build_governor("CIRCL", circl.min_interval_ms, circl.max_in_flight) {
                        source = source.with_governor(governor);
                    }
                    sources.push(Arc::new(source));
                }
                SourceKind::Nvd if config.sources.nvd.enabled => {
                    let nvd = &config.sources.nvd;
                    let mut source = NvdSource::from_config(config)?;
                    if let Some(governor) = build_governor("NVD", nvd.min_interval_ms, nvd.max_in_flight) {
                        source = source.with_governor(governor);
                    }
                    sources.push(Arc::new(source));
                }
                _ => debug!("source {:?} disabled", kind),
            }
        }

        info!(
            "Correlation engine using sources: {}",
            sources.iter().map(|s| s.id().to_string()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self::new(sources).with_max_results(config.correlation.max_results))
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    pub async fn correlate(&self, query: &SourceQuery) -> AggregatedResult {
        self.correlate_with_status(query).await.result
    }

    pub async fn correlate_with_status(&self, query: &SourceQuery) -> CorrelationOutcome {
        debug!("Correlating '{}' across {} sources", query, self.sources.len());

        // join_all yields in input order, whatever order the lookups finish in
        let responses = join_all(self.sources.iter().map(|source| source.query(query))).await;

        let statuses = responses.iter().map(|r| (r.source, r.status)).collect();
        let result = merge_responses(responses, self.max_results);

        CorrelationOutcome { result, statuses }
    }
}

fn build_governor(name: &str, min_interval_ms: u64, max_in_flight: Option<usize>) -> Option<Arc<RateGovernor>> {
    if min_interval_ms == 0 && max_in_flight.is_none() {
        return None;
    }

    let mut governor = RateGovernor::new(name, Duration::from_millis(min_interval_ms));
    if let Some(limit) = max_in_flight {
        governor = governor.with_max_in_flight(limit);
    }
    Some(Arc::new(governor))
}

/// Merge per-source responses given in precedence order.
pub fn merge_responses(responses: Vec<SourceResponse>, max_results: usize) -> AggregatedResult {
    let records = responses
        .into_iter()
        .filter(|r| r.status.is_ok())
        .flat_map(|r| r.records);
    rank(records, max_results)
}

/// Deduplicate by identifier (first wins), sort by score descending, truncate.
pub fn rank<I>(records: I, max_results: usize) -> AggregatedResult
where
    I: IntoIterator<Item = VulnerabilityRecord>,
{
    let mut seen = HashSet::new();
    let mut unique: Vec<VulnerabilityRecord> = records
        .into_iter()
        .filter(|record| !record.id.is_empty() && seen.insert(record.id.clone()))
        .collect();

    // sort_by is stable; equal scores keep precedence order
    unique.sort_by(|a, b| b.cvss.total_cmp(&a.cvss));
    unique.truncate(max_results);

    AggregatedResult::from_ranked(unique)
}
