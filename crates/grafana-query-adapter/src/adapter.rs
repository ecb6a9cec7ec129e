//! The adapter tying template substitution, the query path and variable queries together.
use std::{fmt, sync::Arc};

use crate::{
    query::{self, BackendQueryExecutor, BoxQueryResponseStream, DataQuery, DataQueryRequest, QueryExecutor},
    settings::DataSourceInstanceSettings,
    template::{ScopedVars, TemplateError, TemplateSubstitution},
    transport::QueryTransport,
    variable::{flatten_first_fields, MetricFindQuery, MetricFindRequest},
    Error, MetricFindValue, VariableQuery, VariableQueryOptions, VariableQueryResponse,
};

/// Adapter between a dashboard and the generic query endpoint, for a single datasource instance.
///
/// The adapter holds no state besides its settings and capabilities: every call is
/// independent, nothing is cached and concurrent identical calls are not coalesced.
/// It is cheap to clone and can be shared between tasks.
#[derive(Clone)]
pub struct QueryAdapter {
    settings: DataSourceInstanceSettings,
    template: Arc<dyn TemplateSubstitution>,
    transport: Arc<dyn QueryTransport>,
    executor: Arc<dyn QueryExecutor>,
}

impl QueryAdapter {
    /// Create an adapter for the datasource described by `settings`.
    ///
    /// Panel queries are executed by a [`BackendQueryExecutor`] sharing `transport`.
    pub fn new(
        settings: DataSourceInstanceSettings,
        template: Arc<dyn TemplateSubstitution>,
        transport: Arc<dyn QueryTransport>,
    ) -> Self {
        let executor = Arc::new(BackendQueryExecutor::new(&settings, Arc::clone(&transport)));
        Self {
            settings,
            template,
            transport,
            executor,
        }
    }

    /// Return a new adapter executing panel queries with `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// The settings of the datasource this adapter works for.
    #[must_use]
    pub fn settings(&self) -> &DataSourceInstanceSettings {
        &self.settings
    }

    /// Run a panel query.
    ///
    /// Each target's `queryText` is interpolated against the request's scoped variables,
    /// then the rewritten request is handed to the query executor. The caller's request
    /// is left untouched.
    ///
    /// Interpolation happens before this method returns; the returned stream is the
    /// executor's, unchanged.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the template substitution. Errors raised while
    /// executing the query are yielded by the stream.
    pub fn query(&self, request: &DataQueryRequest) -> Result<BoxQueryResponseStream, Error> {
        let targets = self.interpolate_queries(&request.targets, &request.scoped_vars)?;
        Ok(self.executor.query(DataQueryRequest {
            targets,
            ..request.clone()
        }))
    }

    /// Interpolate the query text of each of `queries`, returning new queries.
    ///
    /// Queries without query text are copied as-is.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the template substitution.
    pub fn interpolate_queries(
        &self,
        queries: &[DataQuery],
        scoped_vars: &ScopedVars,
    ) -> Result<Vec<DataQuery>, TemplateError> {
        queries
            .iter()
            .map(|query| {
                let query_text = query
                    .query_text
                    .as_deref()
                    .map(|text| self.template.replace(text, scoped_vars))
                    .transpose()?;
                Ok(DataQuery {
                    query_text,
                    ..query.clone()
                })
            })
            .collect()
    }

    /// Resolve a variable query to the values offered by a variable picker.
    ///
    /// This never fails: if anything goes wrong, the error is logged and the response
    /// contains the single value `{"text": "ERROR"}`, with the cause available in
    /// [`VariableQueryResponse::error`] flagged as already handled.
    ///
    /// Use [`QueryAdapter::try_resolve_variable_query`] to get the error instead.
    pub async fn resolve_variable_query(
        &self,
        query: &VariableQuery,
        options: &VariableQueryOptions,
    ) -> VariableQueryResponse {
        match self.try_resolve_variable_query(query, options).await {
            Ok(values) => VariableQueryResponse::ok(values),
            Err(error) => {
                tracing::error!(
                    datasource_id = self.settings.id,
                    error_source = %error.error_source(),
                    "Variable query failed: {error}"
                );
                VariableQueryResponse::handled(error)
            }
        }
    }

    /// Resolve a variable query, returning any error to the caller.
    ///
    /// A single request is sent to the query endpoint. The values of the first field of
    /// every returned frame are concatenated, in frame order.
    ///
    /// # Errors
    ///
    /// Returns an error if interpolation fails, the request cannot be delivered, the
    /// endpoint responds with a non-success status, or the response cannot be parsed.
    pub async fn try_resolve_variable_query(
        &self,
        query: &VariableQuery,
        options: &VariableQueryOptions,
    ) -> Result<Vec<MetricFindValue>, Error> {
        let request = self.metric_find_request(query, options)?;
        let data = serde_json::to_value(&request).map_err(Error::Encode)?;
        let response = query::post_query(self.transport.as_ref(), data).await?;
        for err in &response.errors {
            tracing::warn!(
                ref_id = %err.ref_id,
                status = err.status,
                "Variable query returned an error: {}",
                err.message
            );
        }
        Ok(flatten_first_fields(&response.data)?)
    }

    /// Build the body sent to the query endpoint for a variable query.
    ///
    /// Empty query text is sent as-is, without consulting the template substitution.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the template substitution.
    pub fn metric_find_request(
        &self,
        query: &VariableQuery,
        options: &VariableQueryOptions,
    ) -> Result<MetricFindRequest, TemplateError> {
        let query_text = match query.query_text.as_deref() {
            Some(text) if !text.is_empty() => self.template.replace(text, &options.scoped_vars)?,
            _ => String::new(),
        };
        Ok(MetricFindRequest::single(MetricFindQuery {
            datasource_id: self.settings.id,
            org_id: self.settings.org_id(),
            query_text,
            time_out: query.parsed_time_out(),
        }))
    }
}

impl fmt::Debug for QueryAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryAdapter")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        data::QueryResponse,
        template::{ScopedVar, TemplateSrv, VariableValue},
        testing::{CountingTemplate, FailingTemplate, MockTransport},
        HandledError, TimeOut,
    };

    fn settings() -> DataSourceInstanceSettings {
        DataSourceInstanceSettings::new(11, "uid-11").with_type("acme")
    }

    fn adapter(
        template: Arc<dyn TemplateSubstitution>,
        transport: &Arc<MockTransport>,
    ) -> QueryAdapter {
        QueryAdapter::new(settings(), template, Arc::clone(transport) as Arc<dyn QueryTransport>)
    }

    fn scoped(name: &str, value: &str) -> ScopedVars {
        [(name.to_string(), ScopedVar::new(VariableValue::from(value)))].into()
    }

    fn two_frames() -> Value {
        json!({
            "results": {"A": {"frames": [
                {"schema": {"name": "a", "fields": [{"name": "v"}, {"name": "w"}]},
                 "data": {"values": [[1, 2], ["x", "y"]]}},
                {"schema": {"name": "b", "fields": [{"name": "v"}]},
                 "data": {"values": [[3]]}}
            ]}}
        })
    }

    fn sent_query(transport: &MockTransport) -> Value {
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "/api/ds/query");
        assert_eq!(requests[0].method, http::Method::POST);
        requests[0].data.clone().unwrap()["queries"][0].clone()
    }

    /// Records the requests it is asked to execute.
    #[derive(Default)]
    struct RecordingExecutor(std::sync::Mutex<Vec<DataQueryRequest>>);

    impl QueryExecutor for RecordingExecutor {
        fn query(&self, request: DataQueryRequest) -> BoxQueryResponseStream {
            self.0.lock().unwrap().push(request);
            Box::pin(futures::stream::once(async { Ok(QueryResponse::default()) }))
        }
    }

    #[tokio::test]
    async fn query_interpolates_every_target() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = Arc::new(MockTransport::failing("unused"));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport)
            .with_executor(Arc::clone(&executor) as Arc<dyn QueryExecutor>);

        let mut no_text = DataQuery::new("C", "");
        no_text.query_text = None;
        let request = DataQueryRequest::new(vec![
            DataQuery::new("A", "SELECT * FROM $table").with_extra("format", "table"),
            DataQuery::new("B", "SELECT 1"),
            no_text.clone(),
        ])
        .with_scoped_vars(scoped("table", "hosts"));

        let responses: Vec<_> = adapter.query(&request).unwrap().collect().await;
        assert_eq!(responses.len(), 1);

        let executed = executor.0.lock().unwrap();
        assert_eq!(executed.len(), 1);
        let targets = &executed[0].targets;
        assert_eq!(targets.len(), 3);
        assert_eq!(
            targets[0],
            DataQuery::new("A", "SELECT * FROM hosts").with_extra("format", "table")
        );
        assert_eq!(targets[1], request.targets[1]);
        assert_eq!(targets[2], no_text);
        assert_eq!(executed[0].scoped_vars, request.scoped_vars);
        // The caller's request is left as it was.
        assert_eq!(
            request.targets[0].query_text.as_deref(),
            Some("SELECT * FROM $table")
        );
    }

    #[test]
    fn query_with_empty_scope_keeps_text() {
        let transport = Arc::new(MockTransport::failing("unused"));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
        let targets = vec![DataQuery::new("A", "SELECT $x, ${y:csv}")];
        assert_eq!(
            adapter
                .interpolate_queries(&targets, &ScopedVars::new())
                .unwrap(),
            targets
        );
    }

    #[test]
    fn query_propagates_substitution_errors() {
        let transport = Arc::new(MockTransport::failing("unused"));
        let adapter = adapter(Arc::new(FailingTemplate), &transport);
        let request = DataQueryRequest::new(vec![DataQuery::new("A", "x")]);
        assert!(matches!(adapter.query(&request), Err(Error::Template(_))));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn query_delegates_to_backend_by_default() {
        let transport = Arc::new(MockTransport::responding(two_frames()));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
        let request = DataQueryRequest::new(vec![DataQuery::new("A", "SELECT $v")])
            .with_scoped_vars(scoped("v", "1"));
        let responses: Vec<_> = adapter.query(&request).unwrap().collect().await;
        assert_eq!(responses[0].as_ref().unwrap().data.len(), 2);
        assert_eq!(sent_query(&transport)["queryText"], json!("SELECT 1"));
    }

    #[tokio::test]
    async fn variable_query_flattens_frames_in_order() {
        let transport = Arc::new(MockTransport::responding(two_frames()));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
        let query = VariableQuery::new("SELECT v FROM t").with_time_out("30");

        let response = adapter
            .resolve_variable_query(&query, &VariableQueryOptions::default())
            .await;
        assert!(!response.is_error());
        assert_eq!(
            response.into_values(),
            vec![
                MetricFindValue::new(1),
                MetricFindValue::new(2),
                MetricFindValue::new(3)
            ]
        );
        assert_eq!(
            sent_query(&transport),
            json!({"datasourceId": 11, "orgId": 11, "queryText": "SELECT v FROM t", "timeOut": 30})
        );
    }

    #[tokio::test]
    async fn variable_query_interpolates_scoped_vars() {
        let transport = Arc::new(MockTransport::responding(json!({})));
        let template = Arc::new(CountingTemplate::default());
        let adapter = adapter(Arc::clone(&template) as Arc<dyn TemplateSubstitution>, &transport);
        let query = VariableQuery::new("SELECT host FROM $region");

        let values = adapter
            .try_resolve_variable_query(&query, &VariableQueryOptions::new(scoped("region", "eu")))
            .await
            .unwrap();
        assert!(values.is_empty());
        assert_eq!(template.calls(), 1);
        assert_eq!(sent_query(&transport)["queryText"], json!("SELECT host FROM eu"));
    }

    #[tokio::test]
    async fn variable_query_sends_invalid_time_out() {
        let transport = Arc::new(MockTransport::responding(json!({})));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
        let query = VariableQuery::new("q").with_time_out("abc");
        assert_eq!(query.parsed_time_out(), TimeOut::Invalid);

        let response = adapter
            .resolve_variable_query(&query, &VariableQueryOptions::default())
            .await;
        assert!(!response.is_error());
        assert_eq!(sent_query(&transport)["timeOut"], Value::Null);
    }

    #[tokio::test]
    async fn variable_query_without_text_skips_substitution() {
        for query_text in [None, Some(String::new())] {
            let transport = Arc::new(MockTransport::responding(json!({})));
            let template = Arc::new(CountingTemplate::default());
            let adapter =
                adapter(Arc::clone(&template) as Arc<dyn TemplateSubstitution>, &transport);
            let mut query = VariableQuery::default();
            query.query_text = query_text;

            adapter
                .resolve_variable_query(&query, &VariableQueryOptions::default())
                .await;
            assert_eq!(template.calls(), 0);
            assert_eq!(sent_query(&transport)["queryText"], json!(""));
        }
    }

    #[tokio::test]
    async fn variable_query_failures_become_error_value() {
        let failures = [
            MockTransport::failing("connection refused"),
            MockTransport::with_status(StatusCode::INTERNAL_SERVER_ERROR, json!({"message": "db down"})),
            MockTransport::responding(json!({"results": {"A": {"frames": [{"data": {}}]}}})),
            MockTransport::responding(json!({"results": {"A": {"frames": [
                {"schema": {"name": "empty", "fields": []}, "data": {"values": []}}
            ]}}})),
        ];
        for transport in failures {
            let transport = Arc::new(transport);
            let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
            let response = adapter
                .resolve_variable_query(&VariableQuery::new("q"), &VariableQueryOptions::default())
                .await;
            assert_eq!(response.values, vec![MetricFindValue::error()]);
            let error = response.error.expect("error is reported");
            assert!(error.is_handled());
            assert_eq!(transport.requests().len(), 1);
        }
    }

    #[tokio::test]
    async fn variable_query_substitution_failure_is_handled() {
        let transport = Arc::new(MockTransport::responding(json!({})));
        let adapter = adapter(Arc::new(FailingTemplate), &transport);
        let response = adapter
            .resolve_variable_query(&VariableQuery::new("q"), &VariableQueryOptions::default())
            .await;
        assert_eq!(response.values, vec![MetricFindValue::error()]);
        assert!(matches!(
            response.error.map(HandledError::into_inner),
            Some(Error::Template(_))
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn variable_query_is_idempotent() {
        let transport = Arc::new(MockTransport::responding(two_frames()));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
        let query = VariableQuery::new("q");
        let options = VariableQueryOptions::default();
        let first = adapter.resolve_variable_query(&query, &options).await.into_values();
        let second = adapter.resolve_variable_query(&query, &options).await.into_values();
        assert_eq!(first, second);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn variable_query_ignores_columns_without_a_field() {
        let transport = Arc::new(MockTransport::responding(json!({
            "results": {"A": {"frames": [
                {"schema": {"name": "a", "fields": [{"name": "v"}]},
                 "data": {"values": [[1, 2], [9, 9]]}}
            ]}}
        })));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
        let response = adapter
            .resolve_variable_query(&VariableQuery::new("q"), &VariableQueryOptions::default())
            .await;
        assert!(response.error.is_none());
        assert_eq!(
            response.into_values(),
            vec![MetricFindValue::new(1), MetricFindValue::new(2)]
        );
    }

    #[tokio::test]
    async fn variable_query_keeps_frames_alongside_result_errors() {
        let transport = Arc::new(MockTransport::responding(json!({
            "results": {
                "A": {"status": 400, "error": "syntax error", "errorSource": "downstream"},
                "B": {"frames": [
                    {"schema": {"name": "b", "fields": [{"name": "v"}]},
                     "data": {"values": [["x", "y"]]}}
                ]}
            }
        })));
        let adapter = adapter(Arc::new(TemplateSrv::new()), &transport);
        let response = adapter
            .resolve_variable_query(&VariableQuery::new("q"), &VariableQueryOptions::default())
            .await;
        assert!(response.error.is_none());
        assert_eq!(
            response.into_values(),
            vec![MetricFindValue::new("x"), MetricFindValue::new("y")]
        );
    }

    #[test]
    fn explicit_org_id_overrides_datasource_id() {
        let transport = Arc::new(MockTransport::failing("unused"));
        let adapter = QueryAdapter::new(
            settings().with_org_id(1),
            Arc::new(TemplateSrv::new()),
            Arc::clone(&transport) as Arc<dyn QueryTransport>,
        );
        let request = adapter
            .metric_find_request(&VariableQuery::new("q"), &VariableQueryOptions::default())
            .unwrap();
        assert_eq!(request.queries[0].datasource_id, 11);
        assert_eq!(request.queries[0].org_id, 1);
    }
}
