//! Panel queries and the generic query-execution path.
use std::{pin::Pin, sync::Arc};

use chrono::prelude::*;
use futures_core::Stream;
use futures_util::{future, stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

use crate::{
    data::QueryResponse,
    settings::{DataSourceInstanceSettings, DataSourceRef},
    template::ScopedVars,
    transport::{FetchRequest, QueryTransport},
    Error, QUERY_ENDPOINT,
};

/// A single query (target) of a panel.
///
/// Only `queryText` is interpreted by the adapter; every other property set by the
/// query editor is kept in `extra` and sent along untouched.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DataQuery {
    /// The unique identifier of the query within its request.
    pub ref_id: String,

    /// The query text, which may reference template variables.
    #[serde(default)]
    pub query_text: Option<String>,

    /// Whether the query is hidden, in which case it is not executed.
    #[serde(default)]
    pub hide: Option<bool>,

    /// The datasource the query should run against.
    #[serde(default)]
    pub datasource: Option<DataSourceRef>,

    /// Any other properties of the query.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataQuery {
    /// Create a query with the given ref ID and text.
    pub fn new(ref_id: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            query_text: Some(query_text.into()),
            ..Default::default()
        }
    }

    /// Return a new query with an additional custom property.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Return a new query with the `hide` flag set.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hide = Some(true);
        self
    }
}

/// The time range for a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct TimeRange {
    /// The start time of the query.
    pub from: DateTime<Utc>,
    /// The end time of the query.
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Create a new time range.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// A request for data issued by a dashboard panel.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct DataQueryRequest {
    /// The queries to run.
    pub targets: Vec<DataQuery>,
    /// The current values of template variables.
    pub scoped_vars: ScopedVars,
    /// The time range of the request.
    pub range: Option<TimeRange>,
    /// The suggested interval between points, in milliseconds.
    pub interval_ms: Option<i64>,
    /// The maximum number of points to return per series.
    pub max_data_points: Option<i64>,
}

impl DataQueryRequest {
    /// Create a request for the given targets with no scoped variables.
    pub fn new(targets: Vec<DataQuery>) -> Self {
        Self {
            targets,
            ..Default::default()
        }
    }

    /// Return a new request using the given scoped variables.
    #[must_use]
    pub fn with_scoped_vars(mut self, scoped_vars: ScopedVars) -> Self {
        self.scoped_vars = scoped_vars;
        self
    }

    /// Return a new request covering the given time range.
    #[must_use]
    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// Type alias for the boxed stream of responses returned by a [`QueryExecutor`].
pub type BoxQueryResponseStream = Pin<Box<dyn Stream<Item = Result<QueryResponse, Error>> + Send>>;

/// Runs panel queries.
///
/// Implementations return a lazy stream; nothing is expected to happen until it is polled.
pub trait QueryExecutor: Send + Sync {
    /// Execute `request`.
    fn query(&self, request: DataQueryRequest) -> BoxQueryResponseStream;
}

/// A [`QueryExecutor`] posting queries to the generic `/api/ds/query` endpoint.
///
/// Hidden queries are dropped. If nothing remains, a single empty response is
/// produced without contacting the endpoint.
#[derive(Clone)]
pub struct BackendQueryExecutor {
    datasource: DataSourceRef,
    datasource_id: i64,
    transport: Arc<dyn QueryTransport>,
}

impl BackendQueryExecutor {
    /// Create an executor for the given datasource.
    pub fn new(settings: &DataSourceInstanceSettings, transport: Arc<dyn QueryTransport>) -> Self {
        Self {
            datasource: settings.datasource_ref(),
            datasource_id: settings.id,
            transport,
        }
    }

    fn request_body(&self, request: DataQueryRequest) -> Option<BackendQueryBody> {
        let queries: Vec<_> = request
            .targets
            .into_iter()
            .filter(|q| q.hide != Some(true))
            .map(|mut query| {
                query.datasource = query.datasource.or_else(|| Some(self.datasource.clone()));
                BackendQuery {
                    query,
                    datasource_id: self.datasource_id,
                    interval_ms: request.interval_ms,
                    max_data_points: request.max_data_points,
                }
            })
            .collect();
        (!queries.is_empty()).then(|| BackendQueryBody {
            queries,
            from: request.range.map(|r| r.from.timestamp_millis().to_string()),
            to: request.range.map(|r| r.to.timestamp_millis().to_string()),
        })
    }
}

impl std::fmt::Debug for BackendQueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendQueryExecutor")
            .field("datasource", &self.datasource)
            .field("datasource_id", &self.datasource_id)
            .finish()
    }
}

impl QueryExecutor for BackendQueryExecutor {
    fn query(&self, request: DataQueryRequest) -> BoxQueryResponseStream {
        let Some(body) = self.request_body(request) else {
            return Box::pin(stream::once(future::ready(Ok(QueryResponse::default()))));
        };
        let transport = Arc::clone(&self.transport);
        Box::pin(stream::once(async move {
            let data = serde_json::to_value(&body).map_err(Error::Encode)?;
            post_query(transport.as_ref(), data).await
        }))
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendQuery {
    #[serde(flatten)]
    query: DataQuery,
    datasource_id: i64,
    interval_ms: Option<i64>,
    max_data_points: Option<i64>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct BackendQueryBody {
    queries: Vec<BackendQuery>,
    from: Option<String>,
    to: Option<String>,
}

/// POST `data` to the query endpoint and parse the response.
///
/// Non-success status codes are turned into [`Error::Status`].
pub(crate) async fn post_query(
    transport: &dyn QueryTransport,
    data: Value,
) -> Result<QueryResponse, Error> {
    tracing::debug!(url = QUERY_ENDPOINT, "Posting query");
    let response = transport
        .fetch(FetchRequest::post(QUERY_ENDPOINT, data))
        .await?;
    if !response.status.is_success() {
        return Err(Error::Status {
            status: response.status,
            message: response.error_message(),
        });
    }
    Ok(QueryResponse::from_slice(&response.body)?)
}
