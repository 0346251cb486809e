//! Paginated collection over Graph listing endpoints.
//!
//! Graph pages carry their items in `value` and a continuation link in
//! `@odata.nextLink`. The collector follows links until none is returned and
//! hands back every item in page order. Any failed page aborts the whole
//! collection; there is no partial result.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::error::AppError;
use crate::graph::client::GraphClient;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// One page of a Graph collection response.
#[derive(Debug, Deserialize)]
struct WirePage<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    /// Absolute URL of the next page, absent on the last page.
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// PageCollector
// ─────────────────────────────────────────────────────────────────────────────

/// Follows `@odata.nextLink` pagination and accumulates every item.
///
/// # Example
///
/// ```ignore
/// let collector = PageCollector::new(graph_client);
/// let principals: Vec<ServicePrincipal> = collector.collect_all(SERVICE_PRINCIPALS_PATH).await?;
/// ```
#[derive(Clone)]
pub struct PageCollector {
    client: GraphClient,
}

impl PageCollector {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Fetches every page starting at `initial_path` and returns all items.
    ///
    /// # Errors
    ///
    /// Any page failure is returned as-is (see [`GraphClient::request_authed`]).
    /// An undecodable page yields `AppError::Internal`.
    pub async fn collect_all<T>(&self, initial_path: &str) -> Result<Vec<T>, AppError>
    where
        T: DeserializeOwned,
    {
        self.collect_with_progress(initial_path, None::<fn(usize)>)
            .await
    }

    /// Same as [`collect_all`](Self::collect_all), invoking `on_progress` with
    /// the running item count after each page.
    pub async fn collect_with_progress<T, F>(
        &self,
        initial_path: &str,
        on_progress: Option<F>,
    ) -> Result<Vec<T>, AppError>
    where
        T: DeserializeOwned,
        F: Fn(usize),
    {
        let initial_url = self.client.build_url(initial_path)?;

        let mut items: Vec<T> = Vec::new();
        let mut next_url: Option<Url> = Some(initial_url);
        let mut page_count: u32 = 0;

        while let Some(url) = next_url.take() {
            page_count += 1;

            let response = self.client.request_authed(Method::GET, url, None).await?;

            let page: WirePage<T> = response.json().await.map_err(|e| {
                AppError::Internal(format!(
                    "Failed to parse page {} of collection: {}",
                    page_count, e
                ))
            })?;

            let page_len = page.value.len();
            items.extend(page.value);
            debug!(
                "[GRAPH] Page {} returned {} items ({} total)",
                page_count,
                page_len,
                items.len()
            );

            if let Some(ref callback) = on_progress {
                callback(items.len());
            }

            if let Some(link) = page.next_link.filter(|l| !l.is_empty()) {
                next_url = Some(self.client.build_url(&link)?);
            }
        }

        info!(
            "[GRAPH] Collection complete: {} items, {} pages",
            items.len(),
            page_count
        );

        Ok(items)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::client::GraphCredentials;
    use secrecy::SecretString;
    use std::cell::RefCell;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: String,
    }

    fn create_test_collector(graph_url: &str) -> PageCollector {
        let client = GraphClient::new(GraphCredentials {
            graph_url: graph_url.to_string(),
            access_token: SecretString::from("test_token".to_string()),
        })
        .unwrap();
        PageCollector::new(client)
    }

    fn mock_items(count: usize, start_id: usize) -> Vec<serde_json::Value> {
        (start_id..start_id + count)
            .map(|i| serde_json::json!({ "id": format!("sp-{:04}", i) }))
            .collect()
    }

    #[tokio::test]
    async fn follows_next_links_across_pages() {
        let mock_server = MockServer::start().await;
        let collector = create_test_collector(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/v1.0/servicePrincipals"))
            .and(query_param("$top", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": mock_items(3, 1),
                "@odata.nextLink": format!("{}/v1.0/servicePrincipals?$skiptoken=p2", mock_server.uri())
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1.0/servicePrincipals"))
            .and(query_param("$skiptoken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": mock_items(3, 4),
                "@odata.nextLink": format!("{}/v1.0/servicePrincipals?$skiptoken=p3", mock_server.uri())
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1.0/servicePrincipals"))
            .and(query_param("$skiptoken", "p3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": mock_items(2, 7)
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let items: Vec<Item> = collector
            .collect_all("/v1.0/servicePrincipals?$top=3")
            .await
            .unwrap();

        assert_eq!(items.len(), 8);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "sp-0001", "sp-0002", "sp-0003", "sp-0004", "sp-0005", "sp-0006", "sp-0007",
                "sp-0008"
            ]
        );
    }

    #[tokio::test]
    async fn single_page_without_next_link() {
        let mock_server = MockServer::start().await;
        let collector = create_test_collector(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/beta/reports/servicePrincipalSignInActivities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "@odata.context": "https://graph.microsoft.com/beta/$metadata#reports/servicePrincipalSignInActivities",
                "value": mock_items(2, 1)
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let items: Vec<Item> = collector
            .collect_all("/beta/reports/servicePrincipalSignInActivities")
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn empty_collection() {
        let mock_server = MockServer::start().await;
        let collector = create_test_collector(&mock_server.uri());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": [] })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let items: Vec<Item> = collector.collect_all("/v1.0/servicePrincipals").await.unwrap();

        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn failed_page_aborts_collection() {
        let mock_server = MockServer::start().await;
        let collector = create_test_collector(&mock_server.uri());

        Mock::given(method("GET"))
            .and(query_param("$top", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": mock_items(2, 1),
                "@odata.nextLink": format!("{}/v1.0/servicePrincipals?$skiptoken=p2", mock_server.uri())
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(query_param("$skiptoken", "p2"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": { "code": "serviceNotAvailable", "message": "Try later" }
            })))
            .mount(&mock_server)
            .await;

        let result: Result<Vec<Item>, _> = collector
            .collect_all("/v1.0/servicePrincipals?$top=2")
            .await;

        match result {
            Err(AppError::GraphError(msg)) => assert!(msg.contains("serviceNotAvailable")),
            other => panic!("Expected GraphError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn foreign_next_link_is_refused() {
        let mock_server = MockServer::start().await;
        let collector = create_test_collector(&mock_server.uri());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": mock_items(1, 1),
                "@odata.nextLink": "https://attacker.example.com/collect"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result: Result<Vec<Item>, _> = collector.collect_all("/v1.0/servicePrincipals").await;

        assert!(matches!(result, Err(AppError::GraphError(_))));
    }

    #[tokio::test]
    async fn malformed_page_is_internal_error() {
        let mock_server = MockServer::start().await;
        let collector = create_test_collector(&mock_server.uri());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let result: Result<Vec<Item>, _> = collector.collect_all("/v1.0/servicePrincipals").await;

        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn progress_callback_sees_running_totals() {
        let mock_server = MockServer::start().await;
        let collector = create_test_collector(&mock_server.uri());

        Mock::given(method("GET"))
            .and(query_param("$top", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": mock_items(2, 1),
                "@odata.nextLink": format!("{}/v1.0/servicePrincipals?$skiptoken=p2", mock_server.uri())
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(query_param("$skiptoken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": mock_items(1, 3)
            })))
            .mount(&mock_server)
            .await;

        let seen = RefCell::new(Vec::new());
        let items: Vec<Item> = collector
            .collect_with_progress(
                "/v1.0/servicePrincipals?$top=2",
                Some(|count| seen.borrow_mut().push(count)),
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(*seen.borrow(), vec![2, 3]);
    }
}
