//! End-to-end report run: collect, enrich, compile, export.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::ReportConfig;
use crate::error::AppError;
use crate::graph::model::{ServicePrincipal, SignInActivity};
use crate::graph::{
    BatchDispatcher, GraphClient, GraphCredentials, PageCollector, SERVICE_PRINCIPALS_PATH,
    SIGN_IN_ACTIVITIES_PATH,
};
use crate::report::{compile_rows, enrichment_requests, write_report, SignInIndex};

/// Counters for a completed run.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub entities: usize,
    pub telemetry_records: usize,
    pub batch_calls: usize,
    pub sub_request_errors: usize,
    pub rows: usize,
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// Runs the report against the configured Graph endpoint.
pub async fn run_report(config: &ReportConfig) -> Result<RunStats, AppError> {
    config.validate()?;

    let client = GraphClient::with_timeout(
        GraphCredentials {
            graph_url: config.graph_url.clone(),
            access_token: config.access_token.clone(),
        },
        config.timeout,
    )?
    .with_logging_mode(config.logging_mode);

    run_report_with_client(client, config, Utc::now()).await
}

/// Runs the report with an existing client. `run_at` names the output file.
///
/// Nothing is written unless every listing and `$batch` call succeeds.
pub async fn run_report_with_client(
    client: GraphClient,
    config: &ReportConfig,
    run_at: DateTime<Utc>,
) -> Result<RunStats, AppError> {
    let start = Instant::now();

    // Reject bad dispatch settings before any request goes out.
    let dispatcher = BatchDispatcher::new(client.clone())
        .with_batch_size(config.batch_size)?
        .with_concurrency(config.concurrency)?;
    let collector = PageCollector::new(client);

    info!("[REPORT] Collecting service principals");
    let entities: Vec<ServicePrincipal> = collector
        .collect_with_progress(
            SERVICE_PRINCIPALS_PATH,
            Some(|total: usize| debug!("[REPORT] {} service principals so far", total)),
        )
        .await?;

    info!("[REPORT] Collecting sign-in activity");
    let telemetry: Vec<SignInActivity> = collector.collect_all(SIGN_IN_ACTIVITIES_PATH).await?;

    let requests = enrichment_requests(&entities);
    let batch_calls = dispatcher.group_count(requests.len());
    let lookup = dispatcher.dispatch(&requests).await?;
    let sub_request_errors = lookup.values().filter(|r| r.error.is_some()).count();

    let index = SignInIndex::build(&telemetry);
    let rows = compile_rows(&entities, &lookup, &index, config.sub_request_errors);
    let row_count = rows.len();

    let export = config.export.clone();
    let output_path = tokio::task::spawn_blocking(move || write_report(rows, &export, run_at))
        .await
        .map_err(|e| AppError::Internal(format!("Export task panicked: {}", e)))??;

    let stats = RunStats {
        entities: entities.len(),
        telemetry_records: telemetry.len(),
        batch_calls,
        sub_request_errors,
        rows: row_count,
        output_path,
        elapsed: start.elapsed(),
    };

    info!(
        "[REPORT] Done in {:.1}s: {} rows, {} batch calls, {} sub-request errors",
        stats.elapsed.as_secs_f64(),
        stats.rows,
        stats.batch_calls,
        stats.sub_request_errors
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ExportOptions, SubRequestErrorPolicy};
    use chrono::TimeZone;
    use secrecy::SecretString;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
    }

    fn test_config(graph_url: &str, output_dir: &TempDir) -> ReportConfig {
        ReportConfig {
            graph_url: graph_url.to_string(),
            access_token: SecretString::from("test_token".to_string()),
            export: ExportOptions {
                output_dir: output_dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn mount_listings(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1.0/servicePrincipals"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "id": "sp-1",
                        "appId": "app-1",
                        "displayName": "Contoso App",
                        "tags": ["prod", "finance"],
                        "accountEnabled": true
                    },
                    {
                        "id": "sp-2",
                        "appId": "app-2",
                        "displayName": "Alpha Tool"
                    }
                ]
            })))
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/beta/reports/servicePrincipalSignInActivities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "appId": "app-1",
                        "lastSignInActivity": { "lastSignInDateTime": "2024-01-01T00:00:00Z" }
                    }
                ]
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn full_run_writes_sorted_report() {
        let server = MockServer::start().await;
        mount_listings(&server).await;

        Mock::given(method("POST"))
            .and(path("/v1.0/$batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "responses": [
                    { "id": "sp-1_owners", "status": 200,
                      "body": { "value": [{ "userPrincipalName": "alice@x.com" }] } },
                    { "id": "sp-1_assignments", "status": 200,
                      "body": { "value": [{ "principalDisplayName": "Bob", "principalType": "User" }] } },
                    { "id": "sp-2_owners", "status": 200, "body": { "value": [] } },
                    { "id": "sp-2_assignments", "status": 403,
                      "body": { "error": { "code": "Authorization_RequestDenied", "message": "denied" } } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output_dir = TempDir::new().unwrap();
        let mut config = test_config(&server.uri(), &output_dir);
        config.sub_request_errors = SubRequestErrorPolicy::Marker;
        let client = GraphClient::new(GraphCredentials {
            graph_url: server.uri(),
            access_token: config.access_token.clone(),
        })
        .unwrap();

        let stats = run_report_with_client(client, &config, run_at())
            .await
            .unwrap();

        assert_eq!(stats.entities, 2);
        assert_eq!(stats.telemetry_records, 1);
        assert_eq!(stats.batch_calls, 1);
        assert_eq!(stats.sub_request_errors, 1);
        assert_eq!(stats.rows, 2);
        assert_eq!(
            stats.output_path,
            output_dir
                .path()
                .join("AppRegistrationsReport_20240301_083000.csv")
        );

        let mut reader = csv::Reader::from_path(&stats.output_path).unwrap();
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);

        let alpha = &records[0];
        assert_eq!(&alpha[0], "Alpha Tool");
        assert_eq!(&alpha[9], "");
        assert_eq!(&alpha[10], "<lookup failed: Authorization_RequestDenied>");
        assert_eq!(&alpha[17], "Never Signed In");

        let contoso = &records[1];
        assert_eq!(&contoso[0], "Contoso App");
        assert_eq!(&contoso[5], "prod, finance");
        assert_eq!(&contoso[7], "true");
        assert_eq!(&contoso[9], "alice@x.com");
        assert_eq!(&contoso[10], "Bob [User]");
        assert_eq!(&contoso[13], "2024-01-01T00:00:00Z");
        assert_eq!(&contoso[14], "");
        assert_eq!(&contoso[17], "Active");
    }

    #[tokio::test]
    async fn unanswered_lookups_are_marked_and_counted() {
        let server = MockServer::start().await;
        mount_listings(&server).await;

        Mock::given(method("POST"))
            .and(path("/v1.0/$batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "responses": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let output_dir = TempDir::new().unwrap();
        let mut config = test_config(&server.uri(), &output_dir);
        config.sub_request_errors = SubRequestErrorPolicy::Marker;

        let stats = run_report(&config).await.unwrap();

        assert_eq!(stats.sub_request_errors, 4);
        let mut reader = csv::Reader::from_path(&stats.output_path).unwrap();
        for record in reader.records() {
            let record = record.unwrap();
            assert_eq!(&record[9], "<lookup failed: MissingResponse>");
            assert_eq!(&record[10], "<lookup failed: MissingResponse>");
        }
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_report() {
        let server = MockServer::start().await;
        mount_listings(&server).await;

        Mock::given(method("POST"))
            .and(path("/v1.0/$batch"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "code": "InternalServerError", "message": "boom" }
            })))
            .mount(&server)
            .await;

        let output_dir = TempDir::new().unwrap();
        let config = test_config(&server.uri(), &output_dir);

        let result = run_report(&config).await;

        assert!(matches!(result, Err(AppError::GraphError(_))));
        let leftovers: Vec<_> = fs::read_dir(output_dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn invalid_batch_size_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
            .expect(0)
            .mount(&server)
            .await;

        let output_dir = TempDir::new().unwrap();
        let mut config = test_config(&server.uri(), &output_dir);
        config.batch_size = 0;
        let client = GraphClient::new(GraphCredentials {
            graph_url: server.uri(),
            access_token: config.access_token.clone(),
        })
        .unwrap();

        let result = run_report_with_client(client, &config, run_at()).await;

        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn empty_tenant_writes_header_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let output_dir = TempDir::new().unwrap();
        let config = test_config(&server.uri(), &output_dir);

        let stats = run_report(&config).await.unwrap();

        assert_eq!(stats.rows, 0);
        assert_eq!(stats.batch_calls, 0);
        let content = fs::read_to_string(&stats.output_path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
