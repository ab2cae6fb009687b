//! REST Jobs
//!
//! A job pairs a cadence with a request builder and a response processor.
//! Each run builds fresh [`RequestSpec`]s (one per configured ticker for
//! per-ticker endpoints) and hands every decoded response to the processor
//! together with the repository.

mod catalog;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::application::ports::{Repository, RepositoryError, RestPayloadRecord};
use crate::domain::events::NormalizedEvent;
use crate::domain::normalize;

pub use catalog::{build_catalog, default_cadences, parse_cadence_overrides, CadenceTable};

// =============================================================================
// Request Spec
// =============================================================================

/// One concrete HTTP request produced by a job run.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// Unique request name (`job` or `job:TICKER`).
    pub name: String,
    /// Path with the ticker substituted.
    pub path: String,
    /// Query parameters.
    pub params: Vec<(String, String)>,
    /// Rate limiter cost.
    pub tokens: u32,
    /// Values the processor can use to fill gaps in the response.
    pub context: Map<String, Value>,
    /// Partition key for stored payloads (`ticker:SPY`, `market`).
    pub scope: Option<String>,
    /// Catalog key of the endpoint.
    pub endpoint_key: String,
}

impl RequestSpec {
    /// Ticker from the request context, if any.
    #[must_use]
    pub fn context_ticker(&self) -> Option<&str> {
        self.context.get("ticker").and_then(Value::as_str)
    }
}

/// How a job turns the ticker universe into requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBuilder {
    /// One request per configured ticker; `{ticker}` in the path is replaced.
    PerTicker {
        /// Catalog key.
        endpoint_key: String,
        /// Path with a `{ticker}` placeholder.
        path_template: String,
        /// Query parameters.
        params: Vec<(String, String)>,
    },
    /// A single request independent of tickers.
    Static {
        /// Catalog key.
        endpoint_key: String,
        /// Request path.
        path: String,
        /// Query parameters.
        params: Vec<(String, String)>,
        /// Partition key for stored payloads.
        scope: Option<String>,
    },
}

impl RequestBuilder {
    /// Build the requests for one run.
    #[must_use]
    pub fn build(&self, tickers: &[String]) -> Vec<RequestSpec> {
        match self {
            Self::PerTicker {
                endpoint_key,
                path_template,
                params,
            } => tickers
                .iter()
                .map(|ticker| {
                    let mut context = Map::new();
                    context.insert("ticker".to_string(), Value::String(ticker.clone()));
                    RequestSpec {
                        name: format!("{endpoint_key}:{ticker}"),
                        path: path_template.replace("{ticker}", ticker),
                        params: params.clone(),
                        tokens: 1,
                        context,
                        scope: Some(format!("ticker:{ticker}")),
                        endpoint_key: endpoint_key.clone(),
                    }
                })
                .collect(),
            Self::Static {
                endpoint_key,
                path,
                params,
                scope,
            } => vec![RequestSpec {
                name: endpoint_key.clone(),
                path: path.clone(),
                params: params.clone(),
                tokens: 1,
                context: Map::new(),
                scope: scope.clone(),
                endpoint_key: endpoint_key.clone(),
            }],
        }
    }

    /// Catalog key of the endpoint.
    #[must_use]
    pub fn endpoint_key(&self) -> &str {
        match self {
            Self::PerTicker { endpoint_key, .. } | Self::Static { endpoint_key, .. } => endpoint_key,
        }
    }
}

// =============================================================================
// Response Processing
// =============================================================================

/// Response processing errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Repository rejected the write.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Handles a decoded response body.
#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    /// Process one response.
    async fn process(
        &self,
        payload: Value,
        request: &RequestSpec,
        repository: &dyn Repository,
    ) -> Result<(), ProcessError>;
}

/// Stores the raw payload, keyed by endpoint, scope and content hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPayloadProcessor;

#[async_trait]
impl ResponseProcessor for RawPayloadProcessor {
    async fn process(
        &self,
        payload: Value,
        request: &RequestSpec,
        repository: &dyn Repository,
    ) -> Result<(), ProcessError> {
        let record = RestPayloadRecord::new(
            &request.endpoint_key,
            request.scope.clone(),
            payload,
            request.context.clone(),
        );
        repository.store_rest_payload(&record).await?;
        Ok(())
    }
}

/// Stores the raw payload, then upserts every alert in `data` as a
/// [`NormalizedEvent::FlowAlert`].
///
/// Rows without a ticker take the request's ticker. Rows that fail
/// validation are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowAlertProcessor;

impl FlowAlertProcessor {
    fn alerts(payload: &Value, request: &RequestSpec) -> Vec<NormalizedEvent> {
        let rows = match payload {
            Value::Array(rows) => rows.as_slice(),
            Value::Object(obj) => obj
                .get("data")
                .and_then(Value::as_array)
                .map_or(&[][..], Vec::as_slice),
            _ => &[],
        };

        let mut events = Vec::with_capacity(rows.len());
        let mut skipped = 0_usize;
        for row in rows {
            let Some(obj) = row.as_object() else {
                skipped += 1;
                continue;
            };
            let mut obj = obj.clone();
            if let Some(ticker) = request.context_ticker()
                && obj.get("ticker").is_none_or(Value::is_null)
            {
                obj.insert("ticker".to_string(), Value::String(ticker.to_string()));
            }
            match normalize::flow_alert(&obj) {
                Ok(alert) => events.push(NormalizedEvent::FlowAlert(alert)),
                Err(e) => {
                    skipped += 1;
                    tracing::debug!(request = %request.name, error = %e, "Skipping flow alert row");
                }
            }
        }

        if skipped > 0 {
            tracing::warn!(request = %request.name, skipped, "Flow alert rows failed validation");
        }
        events
    }
}

#[async_trait]
impl ResponseProcessor for FlowAlertProcessor {
    async fn process(
        &self,
        payload: Value,
        request: &RequestSpec,
        repository: &dyn Repository,
    ) -> Result<(), ProcessError> {
        let events = Self::alerts(&payload, request);
        RawPayloadProcessor.process(payload, request, repository).await?;
        if !events.is_empty() {
            repository.upsert_events(&events).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Job Definition
// =============================================================================

/// A recurring REST job.
#[derive(Clone)]
pub struct JobDefinition {
    /// Job name (catalog key).
    pub name: String,
    /// Minimum time between runs.
    pub cadence: Duration,
    /// Request builder.
    pub builder: RequestBuilder,
    /// Response processor.
    pub processor: Arc<dyn ResponseProcessor>,
}

impl JobDefinition {
    /// Build this run's requests.
    #[must_use]
    pub fn requests(&self, tickers: &[String]) -> Vec<RequestSpec> {
        self.builder.build(tickers)
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("cadence", &self.cadence)
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::ports::MockRepository;

    fn tickers() -> Vec<String> {
        vec!["SPY".to_string(), "QQQ".to_string()]
    }

    fn flow_request() -> RequestSpec {
        RequestBuilder::PerTicker {
            endpoint_key: "stock_flow_alerts".to_string(),
            path_template: "/api/stock/{ticker}/flow-alerts".to_string(),
            params: vec![("limit".to_string(), "100".to_string())],
        }
        .build(&["SPY".to_string()])
        .remove(0)
    }

    #[test]
    fn per_ticker_builder_expands_each_ticker() {
        let builder = RequestBuilder::PerTicker {
            endpoint_key: "stock_nope".to_string(),
            path_template: "/api/stock/{ticker}/nope".to_string(),
            params: Vec::new(),
        };
        let specs = builder.build(&tickers());
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "stock_nope:SPY");
        assert_eq!(specs[0].path, "/api/stock/SPY/nope");
        assert_eq!(specs[0].scope.as_deref(), Some("ticker:SPY"));
        assert_eq!(specs[1].context_ticker(), Some("QQQ"));
        assert_eq!(specs[1].tokens, 1);
    }

    #[test]
    fn per_ticker_builder_with_no_tickers_yields_nothing() {
        let builder = RequestBuilder::PerTicker {
            endpoint_key: "stock_nope".to_string(),
            path_template: "/api/stock/{ticker}/nope".to_string(),
            params: Vec::new(),
        };
        assert!(builder.build(&[]).is_empty());
    }

    #[test]
    fn static_builder_ignores_tickers() {
        let builder = RequestBuilder::Static {
            endpoint_key: "market_market_tide".to_string(),
            path: "/api/market/market-tide".to_string(),
            params: Vec::new(),
            scope: Some("market".to_string()),
        };
        let specs = builder.build(&tickers());
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "market_market_tide");
        assert!(specs[0].context.is_empty());
        assert_eq!(builder.endpoint_key(), "market_market_tide");
    }

    #[tokio::test]
    async fn raw_processor_stores_payload_with_context() {
        let mut repository = MockRepository::new();
        repository
            .expect_store_rest_payload()
            .withf(|record: &RestPayloadRecord| {
                record.endpoint == "stock_flow_alerts"
                    && record.scope.as_deref() == Some("ticker:SPY")
                    && record.context.get("ticker") == Some(&json!("SPY"))
            })
            .times(1)
            .returning(|_| Ok(()));

        RawPayloadProcessor
            .process(json!({"data": []}), &flow_request(), &repository)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn flow_alert_processor_normalizes_rows() {
        let mut repository = MockRepository::new();
        repository
            .expect_store_rest_payload()
            .times(1)
            .returning(|_| Ok(()));
        repository
            .expect_upsert_events()
            .withf(|events: &[NormalizedEvent]| {
                events.len() == 1 && events[0].ticker() == Some("SPY")
            })
            .times(1)
            .returning(|_| Ok(()));

        let payload = json!({
            "data": [
                {"id": "a-1", "created_at": "2024-03-15T14:30:00Z", "total_premium": "125000"},
                {"created_at": "2024-03-15T14:31:00Z"},
                "not an object"
            ]
        });
        FlowAlertProcessor
            .process(payload, &flow_request(), &repository)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn flow_alert_processor_skips_upsert_for_empty_data() {
        let mut repository = MockRepository::new();
        repository
            .expect_store_rest_payload()
            .times(1)
            .returning(|_| Ok(()));
        repository.expect_upsert_events().never();

        FlowAlertProcessor
            .process(json!({"data": []}), &flow_request(), &repository)
            .await
            .unwrap();
    }
}
