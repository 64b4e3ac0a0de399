//! Vulnerability-intelligence source adapters.
//!
//! Every adapter turns one upstream query/response contract into
//! [`VulnerabilityRecord`]s. Adapters never fail outward: network and parse
//! errors are reported as a [`SourceStatus`] alongside an empty record list.

pub mod circl;
pub mod nvd;

pub use circl::CirclSource;
pub use nvd::NvdSource;

use crate::types::{SourceId, SourceQuery, VulnerabilityRecord};
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Default cap on summary length, in characters.
pub const SUMMARY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceStatus {
    Ok,
    Unavailable,
    RateLimited,
    MalformedResponse,
}

impl SourceStatus {
    pub fn from_error(err: &ScanError) -> Self {
        match err {
            ScanError::SourceRateLimited { .. } => SourceStatus::RateLimited,
            ScanError::SourceMalformed { .. } | ScanError::Serialization(_) => SourceStatus::MalformedResponse,
            _ => SourceStatus::Unavailable,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SourceStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceResponse {
    pub source: SourceId,
    pub records: Vec<VulnerabilityRecord>,
    pub status: SourceStatus,
}

impl SourceResponse {
    pub fn ok(source: SourceId, records: Vec<VulnerabilityRecord>) -> Self {
        Self {
            source,
            records,
            status: SourceStatus::Ok,
        }
    }

    /// A failed lookup never carries records.
    pub fn failed(source: SourceId, status: SourceStatus) -> Self {
        Self {
            source,
            records: Vec::new(),
            status,
        }
    }

    /// Collapse an adapter's internal result into the outward contract.
    pub fn from_result(source: SourceId, query: &SourceQuery, result: Result<Vec<VulnerabilityRecord>>) -> Self {
        match result {
            Ok(records) => {
                debug!("{}: {} records for '{}'", source, records.len(), query);
                Self::ok(source, records)
            }
            Err(e) => {
                let status = SourceStatus::from_error(&e);
                warn!("{}: lookup for '{}' failed ({:?}): {}", source, query, status, e);
                Self::failed(source, status)
            }
        }
    }
}

#[async_trait]
pub trait VulnSource: Send + Sync {
    fn id(&self) -> SourceId;

    async fn query(&self, query: &SourceQuery) -> SourceResponse;
}

/// Truncate `summary` to at most `limit` characters.
pub fn truncate_summary(summary: &str, limit: usize) -> String {
    match summary.char_indices().nth(limit) {
        Some((cut, _)) => summary[..cut].to_string(),
        None => summary.to_string(),
    }
}

/// Clamp an upstream score into `[0.0, 10.0]`; NaN becomes 0.0.
pub fn normalize_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 10.0)
    }
}

/// Build a record, or `None` when the upstream item has no identifier.
pub(crate) fn make_record(
    source: SourceId,
    id: &str,
    summary: &str,
    score: f64,
    summary_limit: usize,
) -> Option<VulnerabilityRecord> {
    let id = id.trim();
    if id.is_empty() {
        return None;
    }

    Some(VulnerabilityRecord {
        id: id.to_string(),
        summary: truncate_summary(summary, summary_limit),
        cvss: normalize_score(score),
        source,
    })
}
