use mockito::{Matcher, Server};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vulnhunter::{
    governor::RateGovernor,
    http::{RetryPolicy, SourceClient},
    sources::{
        circl::parse_circl_body, normalize_score, nvd::max_score, nvd::parse_nvd_body, truncate_summary,
        CirclSource, NvdSource, SourceStatus, VulnSource,
    },
    types::{SourceId, SourceQuery},
};

fn test_client(name: &str) -> SourceClient {
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(20),
    };
    SourceClient::new(name, Duration::from_secs(5), "VulnHunter-Test", retry).unwrap()
}

fn circl(server: &Server) -> CirclSource {
    CirclSource::new(test_client("CIRCL"), format!("{}/api/search", server.url()))
}

fn nvd(server: &Server) -> NvdSource {
    NvdSource::new(test_client("NVD"), format!("{}/rest/json/cves/1.0", server.url()))
}

const NVD_LEGACY: &str = r#"{
  "resultsPerPage": 2,
  "totalResults": 2,
  "result": {
    "CVE_data_type": "CVE",
    "CVE_Items": [
      {
        "cve": {
          "CVE_data_meta": { "ID": "CVE-2021-41773" },
          "description": { "description_data": [ { "lang": "en", "value": "Path traversal in Apache 2.4.49" } ] }
        },
        "impact": {
          "baseMetricV3": { "cvssV3": { "baseScore": 7.5 } },
          "baseMetricV2": { "cvssV2": { "baseScore": 5.0 } }
        }
      },
      {
        "cve": {
          "CVE_data_meta": { "ID": "CVE-2021-42013" },
          "description": { "description_data": [] }
        }
      }
    ]
  }
}"#;

const NVD_CURRENT: &str = r#"{
  "resultsPerPage": 1,
  "vulnerabilities": [
    {
      "cve": {
        "id": "CVE-2021-41773",
        "descriptions": [
          { "lang": "es", "value": "Recorrido de ruta" },
          { "lang": "en", "value": "Path traversal" }
        ],
        "metrics": {
          "cvssMetricV31": [ { "source": "nvd@nist.gov", "cvssData": { "baseScore": 7.5 } } ],
          "cvssMetricV2": [ { "cvssData": { "baseScore": 5.0 } } ],
          "cvssMetricV30": [ { "cvssData": { "baseScore": 9.8 } } ]
        }
      }
    }
  ]
}"#;

#[test]
fn test_circl_body_variants() {
    let list = r#"[
        {"id": "CVE-2021-41773", "summary": "Path traversal", "cvss": 9.8},
        {"id": "CVE-2021-42013", "summary": "Bypass", "cvss": "7.5"},
        {"id": "CVE-2020-0001", "summary": "No score", "cvss": null},
        {"summary": "No identifier", "cvss": 5.0},
        {"id": "", "cvss": 5.0}
    ]"#;
    let records = parse_circl_body(list, 500).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].cvss, 9.8);
    assert_eq!(records[1].cvss, 7.5);
    assert_eq!(records[2].cvss, 0.0);
    assert!(records.iter().all(|r| r.source == SourceId::Circl && !r.id.is_empty()));

    let envelope = r#"{"results": [{"id": "CVE-2019-0211", "summary": "Local privilege escalation"}]}"#;
    let records = parse_circl_body(envelope, 500).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cvss, 0.0);

    assert!(parse_circl_body("null", 500).unwrap().is_empty());
    assert!(parse_circl_body("[]", 500).unwrap().is_empty());
    assert!(parse_circl_body("<html>", 500).is_err());
    assert!(parse_circl_body(r#"{"message": "Not found", "status": 404}"#, 500).is_err());
}

#[test]
fn test_summary_truncation() {
    let long = "a".repeat(2000);
    let body = format!(r#"[{{"id": "CVE-2021-1", "summary": "{}", "cvss": 1.0}}]"#, long);
    let records = parse_circl_body(&body, 500).unwrap();
    assert_eq!(records[0].summary.chars().count(), 500);

    assert_eq!(truncate_summary("héllo wörld", 5), "héllo");
    assert_eq!(truncate_summary("short", 500), "short");
}

#[test]
fn test_score_normalization() {
    assert_eq!(normalize_score(12.0), 10.0);
    assert_eq!(normalize_score(-1.0), 0.0);
    assert_eq!(normalize_score(f64::NAN), 0.0);
    assert_eq!(normalize_score(6.4), 6.4);
}

#[test]
fn test_nvd_max_score() {
    assert_eq!(max_score([5.0, 9.8, 7.5]), 9.8);
    assert_eq!(max_score([7.5, 7.5]), 7.5);
    assert_eq!(max_score(Vec::new()), 0.0);
    assert_eq!(max_score([f64::NAN, 3.0]), 3.0);
}

#[test]
fn test_nvd_legacy_body() {
    let records = parse_nvd_body(NVD_LEGACY, 500).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "CVE-2021-41773");
    assert_eq!(records[0].cvss, 7.5);
    assert_eq!(records[0].summary, "Path traversal in Apache 2.4.49");
    assert_eq!(records[0].source, SourceId::Nvd);

    // No metrics at all
    assert_eq!(records[1].cvss, 0.0);
    assert_eq!(records[1].summary, "");
}

#[test]
fn test_nvd_current_body() {
    let records = parse_nvd_body(NVD_CURRENT, 500).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cvss, 9.8);
    assert_eq!(records[0].summary, "Path traversal");
}

#[tokio::test]
async fn test_circl_query_parameters() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("product".into(), "Apache httpd".into()),
            Matcher::UrlEncoded("version".into(), "2.4.49".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id": "CVE-2021-41773", "summary": "Path traversal", "cvss": 9.8}]"#)
        .create_async()
        .await;

    let response = circl(&server)
        .query(&SourceQuery::new("Apache httpd", "2.4.49"))
        .await;

    mock.assert_async().await;
    assert_eq!(response.status, SourceStatus::Ok);
    assert_eq!(response.source, SourceId::Circl);
    assert_eq!(response.records.len(), 1);
    assert_eq!(response.records[0].id, "CVE-2021-41773");
}

#[tokio::test]
async fn test_retry_on_server_error_then_success() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("GET", Matcher::Any)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;
    let healthy = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_body(r#"[{"id": "CVE-2021-41773", "cvss": 9.8}]"#)
        .expect(1)
        .create_async()
        .await;

    let response = circl(&server).query(&SourceQuery::new("http", "2.4.49")).await;

    failing.assert_async().await;
    healthy.assert_async().await;
    assert_eq!(response.status, SourceStatus::Ok);
    assert_eq!(response.records.len(), 1);
}

#[tokio::test]
async fn test_persistent_server_error_is_unavailable() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let response = circl(&server).query(&SourceQuery::new("http", "")).await;

    mock.assert_async().await;
    assert_eq!(response.status, SourceStatus::Unavailable);
    assert!(response.records.is_empty());
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let response = nvd(&server).query(&SourceQuery::new("nginx", "1.18.0")).await;

    mock.assert_async().await;
    assert_eq!(response.status, SourceStatus::Unavailable);
    assert!(response.records.is_empty());
}

#[tokio::test]
async fn test_too_many_requests_is_rate_limited() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .with_status(429)
        .expect(1)
        .create_async()
        .await;

    let response = nvd(&server).query(&SourceQuery::new("nginx", "1.18.0")).await;

    mock.assert_async().await;
    assert_eq!(response.status, SourceStatus::RateLimited);
    assert!(response.records.is_empty());
}

#[tokio::test]
async fn test_garbage_body_is_malformed() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_body("<html><body>maintenance</body></html>")
        .create_async()
        .await;

    let circl_response = circl(&server).query(&SourceQuery::new("http", "")).await;
    assert_eq!(circl_response.status, SourceStatus::MalformedResponse);
    assert!(circl_response.records.is_empty());

    let nvd_response = nvd(&server).query(&SourceQuery::new("http", "")).await;
    assert_eq!(nvd_response.status, SourceStatus::MalformedResponse);
}

#[tokio::test]
async fn test_circl_error_object_is_malformed() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message": "Not found", "status": 404}"#)
        .create_async()
        .await;

    let response = circl(&server).query(&SourceQuery::new("http", "2.4.49")).await;
    assert_eq!(response.status, SourceStatus::MalformedResponse);
    assert!(response.records.is_empty());
}

#[tokio::test]
async fn test_unreachable_source_is_unavailable() {
    // Nothing listens on the discard port
    let source = CirclSource::new(test_client("CIRCL"), "http://127.0.0.1:9/api/search");
    let response = source.query(&SourceQuery::new("http", "")).await;
    assert_eq!(response.status, SourceStatus::Unavailable);
}

#[tokio::test]
async fn test_nvd_keyword_and_api_key() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/rest/json/cves/1.0")
        .match_header("apiKey", "secret-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("keyword".into(), "Apache httpd 2.4.49".into()),
            Matcher::UrlEncoded("resultsPerPage".into(), "20".into()),
        ]))
        .with_status(200)
        .with_body(NVD_LEGACY)
        .create_async()
        .await;

    let response = nvd(&server)
        .with_api_key("secret-key")
        .query(&SourceQuery::new("Apache httpd", "2.4.49"))
        .await;

    mock.assert_async().await;
    assert_eq!(response.status, SourceStatus::Ok);
    assert_eq!(response.records.len(), 2);
}

#[tokio::test]
async fn test_nvd_without_api_key_sends_no_header() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .match_header("apiKey", Matcher::Missing)
        .with_status(200)
        .with_body(NVD_CURRENT)
        .create_async()
        .await;

    let response = nvd(&server)
        .with_keyword_param("keywordSearch")
        .query(&SourceQuery::new("nginx", ""))
        .await;

    mock.assert_async().await;
    assert_eq!(response.status, SourceStatus::Ok);
}

#[tokio::test]
async fn test_governed_source_spaces_requests() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .expect(3)
        .create_async()
        .await;

    let governor = Arc::new(RateGovernor::new("CIRCL", Duration::from_millis(200)));
    let source = Arc::new(circl(&server).with_governor(governor));

    let start = Instant::now();
    let queries = (0..3).map(|i| {
        let source = Arc::clone(&source);
        async move { source.query(&SourceQuery::new(format!("product-{}", i), "")).await }
    });
    let responses = futures::future::join_all(queries).await;

    assert!(responses.iter().all(|r| r.status.is_ok()));
    assert!(start.elapsed() >= Duration::from_millis(400));
}
