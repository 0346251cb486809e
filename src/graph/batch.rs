//! JSON batching against the Graph `$batch` endpoint.
//!
//! A flat list of independent sub-requests is split into consecutive groups of
//! at most [`MAX_BATCH_SIZE`] and each group goes out as one `POST /$batch`.
//! Sub-responses are matched back to their request by id and merged into a
//! single lookup.
//!
//! Failure semantics:
//! - a sub-request answering with an error status is captured on its
//!   [`BatchResult`] and does not abort anything;
//! - a failure of the `$batch` call itself aborts the whole dispatch.

use std::collections::{HashMap, HashSet};

use futures_util::stream::{self, StreamExt};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::graph::client::{GraphClient, WireErrorEnvelope};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Graph refuses `$batch` bodies with more than 20 requests.
pub const MAX_BATCH_SIZE: usize = 20;

/// Path of the batch endpoint.
pub const BATCH_PATH: &str = "/v1.0/$batch";

/// Error code recorded for a request the `$batch` reply left out.
pub const MISSING_RESPONSE_CODE: &str = "MissingResponse";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// One sub-request inside a `$batch` body.
///
/// `url` is relative to the API version root, e.g.
/// `/servicePrincipals/{id}/owners`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRequest {
    pub id: String,
    pub method: String,
    pub url: String,
}

impl BatchRequest {
    pub fn get(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: Method::GET.to_string(),
            url: url.into(),
        }
    }
}

/// Error reported by Graph for a single sub-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequestError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// Outcome of one sub-request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub id: String,
    pub status: u16,
    pub body: Option<serde_json::Value>,
    /// Set when `status` is 400 or above.
    pub error: Option<SubRequestError>,
}

impl BatchResult {
    /// Decodes the `value` array of a collection body.
    ///
    /// Returns the captured sub-request error if there is one. A success body
    /// that does not decode is reported as an `InvalidBody` error so callers
    /// only have one failure shape to handle.
    pub fn value_items<T: DeserializeOwned>(&self) -> Result<Vec<T>, SubRequestError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let Some(body) = &self.body else {
            return Ok(Vec::new());
        };

        if self.has_more_pages() {
            warn!(
                "[BATCH] Result '{}' has more pages; only the first page is used",
                self.id
            );
        }

        match body.get("value") {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => {
                serde_json::from_value::<Vec<T>>(value.clone()).map_err(|e| SubRequestError {
                    status: self.status,
                    code: "InvalidBody".to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// True when the body carries an `@odata.nextLink`.
    pub fn has_more_pages(&self) -> bool {
        self.body
            .as_ref()
            .and_then(|b| b.get("@odata.nextLink"))
            .and_then(|l| l.as_str())
            .is_some_and(|l| !l.is_empty())
    }

    /// Placeholder for a request the `$batch` reply never answered.
    fn missing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: 0,
            body: None,
            error: Some(SubRequestError {
                status: 0,
                code: MISSING_RESPONSE_CODE.to_string(),
                message: "No response returned for this request".to_string(),
            }),
        }
    }

    fn from_wire(wire: WireSubResponse) -> Self {
        let error = (wire.status >= 400).then(|| {
            let parsed = wire
                .body
                .clone()
                .and_then(|b| serde_json::from_value::<WireErrorEnvelope>(b).ok())
                .map(|envelope| envelope.error);

            match parsed {
                Some(e) => SubRequestError {
                    status: wire.status,
                    code: e.code,
                    message: e.message,
                },
                None => SubRequestError {
                    status: wire.status,
                    code: format!("HTTP{}", wire.status),
                    message: String::new(),
                },
            }
        });

        Self {
            id: wire.id,
            status: wire.status,
            body: wire.body,
            error,
        }
    }
}

/// Results of a dispatch, keyed by request id.
pub type BatchLookup = HashMap<String, BatchResult>;

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireBatchRequest<'a> {
    requests: &'a [BatchRequest],
}

#[derive(Debug, Deserialize)]
struct WireBatchResponse {
    responses: Vec<WireSubResponse>,
}

#[derive(Debug, Deserialize)]
struct WireSubResponse {
    id: String,
    status: u16,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchDispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Splits sub-requests into `$batch` calls and merges the answers.
///
/// Groups go out one at a time unless a concurrency above 1 is configured, in
/// which case up to that many groups are in flight and the first failure
/// aborts the dispatch.
#[derive(Clone)]
pub struct BatchDispatcher {
    client: GraphClient,
    batch_size: usize,
    concurrency: usize,
}

impl BatchDispatcher {
    /// Creates a sequential dispatcher using the maximum batch size.
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            batch_size: MAX_BATCH_SIZE,
            concurrency: 1,
        }
    }

    /// Sets the group size.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidConfig` unless `1 <= batch_size <= MAX_BATCH_SIZE`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self, AppError> {
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(AppError::InvalidConfig(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, batch_size
            )));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    /// Sets how many `$batch` calls may be in flight at once.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidConfig` if `concurrency` is 0.
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, AppError> {
        if concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "batch concurrency must be at least 1".to_string(),
            ));
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of `$batch` calls needed for `request_count` sub-requests.
    pub fn group_count(&self, request_count: usize) -> usize {
        request_count.div_ceil(self.batch_size)
    }

    /// Sends every request and returns the merged lookup.
    ///
    /// # Errors
    ///
    /// - `AppError::DuplicateRequestKey` if two requests share an id (checked
    ///   before anything is sent)
    /// - any error from a `$batch` call itself
    pub async fn dispatch(&self, requests: &[BatchRequest]) -> Result<BatchLookup, AppError> {
        ensure_unique_ids(requests)?;

        let groups: Vec<&[BatchRequest]> = requests.chunks(self.batch_size).collect();
        info!(
            "[BATCH] Dispatching {} requests in {} batches (size {}, concurrency {})",
            requests.len(),
            groups.len(),
            self.batch_size,
            self.concurrency
        );

        let mut lookup: BatchLookup = HashMap::with_capacity(requests.len());

        if self.concurrency <= 1 {
            for (index, group) in groups.iter().enumerate() {
                let results = self.send_group(index, group).await?;
                merge_results(&mut lookup, results);
            }
        } else {
            let mut in_flight = stream::iter(
                groups
                    .iter()
                    .enumerate()
                    .map(|(index, group)| self.send_group(index, group)),
            )
            .buffer_unordered(self.concurrency);

            // Returning early drops the stream, which cancels the remaining calls.
            while let Some(results) = in_flight.next().await {
                merge_results(&mut lookup, results?);
            }
        }

        let failed = lookup.values().filter(|r| r.error.is_some()).count();
        info!(
            "[BATCH] Dispatch complete: {} results, {} sub-request errors",
            lookup.len(),
            failed
        );

        Ok(lookup)
    }

    /// Issues one `$batch` call for a group.
    async fn send_group(
        &self,
        index: usize,
        group: &[BatchRequest],
    ) -> Result<Vec<BatchResult>, AppError> {
        let url = self.client.build_url(BATCH_PATH)?;
        let body = serde_json::to_vec(&WireBatchRequest { requests: group })
            .map_err(|e| AppError::Internal(format!("Failed to encode batch body: {}", e)))?;

        let response = self
            .client
            .request_authed(Method::POST, url, Some(body))
            .await?;

        let wire: WireBatchResponse = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse batch {} response: {}", index, e))
        })?;

        let expected: HashSet<&str> = group.iter().map(|r| r.id.as_str()).collect();
        let mut seen: HashSet<String> = HashSet::with_capacity(group.len());
        let mut results = Vec::with_capacity(group.len());

        for sub in wire.responses {
            if !expected.contains(sub.id.as_str()) {
                warn!("[BATCH] Batch {} returned unknown id '{}'", index, sub.id);
                continue;
            }
            if !seen.insert(sub.id.clone()) {
                warn!("[BATCH] Batch {} repeated id '{}'", index, sub.id);
                continue;
            }
            results.push(BatchResult::from_wire(sub));
        }

        if results.len() < group.len() {
            warn!(
                "[BATCH] Batch {} answered {} of {} requests",
                index,
                results.len(),
                group.len()
            );
            for request in group.iter().filter(|r| !seen.contains(&r.id)) {
                results.push(BatchResult::missing(&request.id));
            }
        }

        debug!("[BATCH] Batch {} complete: {} results", index, results.len());
        Ok(results)
    }
}

fn ensure_unique_ids(requests: &[BatchRequest]) -> Result<(), AppError> {
    let mut ids: HashSet<&str> = HashSet::with_capacity(requests.len());
    for request in requests {
        if !ids.insert(request.id.as_str()) {
            return Err(AppError::DuplicateRequestKey(request.id.clone()));
        }
    }
    Ok(())
}

fn merge_results(lookup: &mut BatchLookup, results: Vec<BatchResult>) {
    for result in results {
        lookup.insert(result.id.clone(), result);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
