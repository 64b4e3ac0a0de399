use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vulnhunter::{
    config::{Config, SourceKind},
    correlation::{merge_responses, rank, CorrelationEngine, MAX_RESULTS},
    sources::{SourceResponse, SourceStatus, VulnSource},
    types::{AggregatedResult, SourceId, SourceQuery, VulnerabilityRecord},
};

struct FakeSource {
    id: SourceId,
    status: SourceStatus,
    records: Vec<VulnerabilityRecord>,
    delay: Duration,
}

impl FakeSource {
    fn ok(id: SourceId, records: Vec<VulnerabilityRecord>) -> Arc<dyn VulnSource> {
        Arc::new(Self {
            id,
            status: SourceStatus::Ok,
            records,
            delay: Duration::ZERO,
        })
    }

    fn failing(id: SourceId, status: SourceStatus) -> Arc<dyn VulnSource> {
        Arc::new(Self {
            id,
            status,
            records: Vec::new(),
            delay: Duration::ZERO,
        })
    }

    fn slow(id: SourceId, records: Vec<VulnerabilityRecord>, delay: Duration) -> Arc<dyn VulnSource> {
        Arc::new(Self {
            id,
            status: SourceStatus::Ok,
            records,
            delay,
        })
    }
}

#[async_trait]
impl VulnSource for FakeSource {
    fn id(&self) -> SourceId {
        self.id
    }

    async fn query(&self, _query: &SourceQuery) -> SourceResponse {
        tokio::time::sleep(self.delay).await;
        if self.status.is_ok() {
            SourceResponse::ok(self.id, self.records.clone())
        } else {
            SourceResponse::failed(self.id, self.status)
        }
    }
}

fn record(id: &str, cvss: f64, source: SourceId) -> VulnerabilityRecord {
    VulnerabilityRecord {
        id: id.to_string(),
        summary: format!("{} summary", id),
        cvss,
        source,
    }
}

fn assert_invariants(result: &AggregatedResult) {
    assert!(result.len() <= MAX_RESULTS);
    let mut seen = HashSet::new();
    for r in result.iter() {
        assert!(!r.id.is_empty());
        assert!(seen.insert(r.id.clone()), "duplicate {}", r.id);
    }
    for pair in result.records().windows(2) {
        assert!(pair[0].cvss >= pair[1].cvss);
    }
}

fn query() -> SourceQuery {
    SourceQuery::new("Apache httpd", "2.4.49")
}

#[tokio::test]
async fn test_single_source_single_record() {
    let engine = CorrelationEngine::new(vec![FakeSource::ok(
        SourceId::Circl,
        vec![record("CVE-2021-41773", 9.8, SourceId::Circl)],
    )]);

    let result = engine.correlate(&SourceQuery::new("http", "2.4.49")).await;
    assert_eq!(result.len(), 1);
    assert_eq!(result.records()[0].id, "CVE-2021-41773");
    assert_eq!(result.records()[0].cvss, 9.8);
}

#[tokio::test]
async fn test_duplicate_keeps_first_source_copy() {
    let engine = CorrelationEngine::new(vec![
        FakeSource::ok(SourceId::Circl, vec![record("CVE-2020-0001", 7.5, SourceId::Circl)]),
        FakeSource::ok(SourceId::Nvd, vec![record("CVE-2020-0001", 8.0, SourceId::Nvd)]),
    ]);

    let result = engine.correlate(&query()).await;
    assert_eq!(result.len(), 1);
    assert_eq!(result.records()[0].cvss, 7.5);
    assert_eq!(result.records()[0].source, SourceId::Circl);
}

#[tokio::test]
async fn test_precedence_ignores_completion_order() {
    // The higher-precedence source answers last
    let engine = CorrelationEngine::new(vec![
        FakeSource::slow(
            SourceId::Circl,
            vec![record("CVE-2020-0001", 7.5, SourceId::Circl)],
            Duration::from_millis(150),
        ),
        FakeSource::ok(SourceId::Nvd, vec![record("CVE-2020-0001", 8.0, SourceId::Nvd)]),
    ]);

    let result = engine.correlate(&query()).await;
    assert_eq!(result.records()[0].source, SourceId::Circl);
}

#[tokio::test]
async fn test_sources_run_concurrently() {
    let engine = CorrelationEngine::new(vec![
        FakeSource::slow(SourceId::Circl, vec![record("CVE-1", 1.0, SourceId::Circl)], Duration::from_millis(300)),
        FakeSource::slow(SourceId::Nvd, vec![record("CVE-2", 2.0, SourceId::Nvd)], Duration::from_millis(300)),
    ]);

    let start = Instant::now();
    let result = engine.correlate(&query()).await;
    assert_eq!(result.len(), 2);
    assert!(start.elapsed() < Duration::from_millis(550));
}

#[tokio::test]
async fn test_ordering_and_bound() {
    let circl: Vec<_> = (0..12)
        .map(|i| record(&format!("CVE-2021-{:04}", i), (i % 10) as f64, SourceId::Circl))
        .collect();
    let nvd: Vec<_> = (6..20)
        .map(|i| record(&format!("CVE-2021-{:04}", i), (i as f64) / 2.0, SourceId::Nvd))
        .collect();

    let engine = CorrelationEngine::new(vec![
        FakeSource::ok(SourceId::Circl, circl),
        FakeSource::ok(SourceId::Nvd, nvd),
    ]);
    let result = engine.correlate(&query()).await;

    assert_eq!(result.len(), MAX_RESULTS);
    assert_invariants(&result);
    assert_eq!(result.records()[0].cvss, 9.5);
}

#[tokio::test]
async fn test_equal_scores_keep_precedence_order() {
    let engine = CorrelationEngine::new(vec![
        FakeSource::ok(
            SourceId::Circl,
            vec![record("CVE-A", 5.0, SourceId::Circl), record("CVE-B", 5.0, SourceId::Circl)],
        ),
        FakeSource::ok(SourceId::Nvd, vec![record("CVE-C", 5.0, SourceId::Nvd)]),
    ]);

    for _ in 0..5 {
        let ids: Vec<_> = engine
            .correlate(&query())
            .await
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["CVE-A", "CVE-B", "CVE-C"]);
    }
}

#[tokio::test]
async fn test_all_sources_failing_yields_empty() {
    let engine = CorrelationEngine::new(vec![
        FakeSource::failing(SourceId::Circl, SourceStatus::Unavailable),
        FakeSource::failing(SourceId::Nvd, SourceStatus::Unavailable),
    ]);

    let outcome = engine.correlate_with_status(&query()).await;
    assert!(outcome.result.is_empty());
    assert_eq!(outcome.failed_sources(), vec![SourceId::Circl, SourceId::Nvd]);
}

#[tokio::test]
async fn test_partial_failure_keeps_other_source() {
    let engine = CorrelationEngine::new(vec![
        FakeSource::failing(SourceId::Circl, SourceStatus::RateLimited),
        FakeSource::ok(SourceId::Nvd, vec![record("CVE-2021-41773", 7.5, SourceId::Nvd)]),
    ]);

    let outcome = engine.correlate_with_status(&query()).await;
    assert_eq!(outcome.result.len(), 1);
    assert_eq!(
        outcome.statuses,
        vec![(SourceId::Circl, SourceStatus::RateLimited), (SourceId::Nvd, SourceStatus::Ok)]
    );
    assert_eq!(outcome.failed_sources(), vec![SourceId::Circl]);
}

#[tokio::test]
async fn test_no_sources() {
    let engine = CorrelationEngine::new(Vec::new());
    assert!(engine.correlate(&query()).await.is_empty());
}

#[test]
fn test_merge_ignores_records_from_failed_responses() {
    let mut failed = SourceResponse::failed(SourceId::Circl, SourceStatus::MalformedResponse);
    failed.records.push(record("CVE-X", 10.0, SourceId::Circl));
    let ok = SourceResponse::ok(SourceId::Nvd, vec![record("CVE-Y", 3.0, SourceId::Nvd)]);

    let merged = merge_responses(vec![failed, ok], MAX_RESULTS);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged.records()[0].id, "CVE-Y");
}

#[test]
fn test_rank_drops_blank_identifiers_and_truncates() {
    let records = vec![
        record("", 9.0, SourceId::Circl),
        record("CVE-1", 1.0, SourceId::Circl),
        record("CVE-2", 2.0, SourceId::Circl),
        record("CVE-3", 3.0, SourceId::Circl),
    ];
    let ranked = rank(records, 2);
    let ids: Vec<_> = ranked.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["CVE-3", "CVE-2"]);
}

#[test]
fn test_engine_from_config_respects_order_and_enabled() {
    let mut config = Config::default();
    config.sources.order = vec![SourceKind::Nvd, SourceKind::Circl, SourceKind::Nvd];
    let engine = CorrelationEngine::from_config(&config).unwrap();
    assert_eq!(engine.source_ids(), vec![SourceId::Nvd, SourceId::Circl]);

    config.sources.circl.enabled = false;
    let engine = CorrelationEngine::from_config(&config).unwrap();
    assert_eq!(engine.source_ids(), vec![SourceId::Nvd]);
}
