/*! A query adapter for Grafana datasources.

This crate contains the thin layer that sits between a Grafana dashboard and the
generic `/api/ds/query` endpoint. It does two things:

- it interpolates template variables into the text of every outgoing query before
  handing the request to a generic query-execution path (see [`QueryAdapter::query`]), and
- it resolves *variable queries*, issuing a single ad-hoc query and flattening the first
  field of every returned [`Frame`][data::Frame] into a list of [`MetricFindValue`]s for
  use in variable pickers (see [`QueryAdapter::resolve_variable_query`]).

Everything the adapter talks to is injected as a capability:

- [`template::TemplateSubstitution`] performs variable interpolation. [`template::TemplateSrv`]
  is a built-in implementation understanding the usual `$var`, `${var}`, `${var:format}` and
  `[[var]]` syntaxes.
- [`transport::QueryTransport`] performs HTTP requests. With the `reqwest` feature enabled
  (the default), [`transport::ReqwestTransport`] talks to a real Grafana instance.
- [`query::QueryExecutor`] runs regular panel queries. [`query::BackendQueryExecutor`]
  posts them to `/api/ds/query` using the same transport.

# Example

```rust,no_run
use std::sync::Arc;

use grafana_query_adapter::{
    config::GrafanaConfig,
    settings::DataSourceInstanceSettings,
    template::TemplateSrv,
    transport::ReqwestTransport,
    QueryAdapter, VariableQuery, VariableQueryOptions,
};

# async fn run() -> Result<(), Box<dyn std::error::Error>> {
let config = GrafanaConfig::from_env();
let settings: DataSourceInstanceSettings = serde_json::from_str(
    r#"{"id": 7, "uid": "abc", "type": "my-datasource", "name": "My datasource"}"#,
)?;
let adapter = QueryAdapter::new(
    settings,
    Arc::new(TemplateSrv::new()),
    Arc::new(ReqwestTransport::from_config(&config)?),
);

let query = VariableQuery::new("SELECT host FROM hosts").with_time_out("30");
let values = adapter
    .resolve_variable_query(&query, &VariableQueryOptions::default())
    .await
    .into_values();
# Ok(())
# }
```

# Feature flags

- `reqwest` (enabled by default) - adds [`transport::ReqwestTransport`], a
  [`transport::QueryTransport`] backed by [`reqwest`].
*/
#![cfg_attr(docsrs, feature(doc_notable_trait))]
#![deny(missing_docs)]

#[doc(hidden)]
pub use serde_json;

#[cfg(feature = "reqwest")]
extern crate reqwest_lib as reqwest;

mod adapter;
pub mod config;
pub mod data;
mod error;
pub mod logging;
pub mod query;
pub mod settings;
pub mod template;
#[cfg(test)]
mod testing;
pub mod transport;
mod variable;

pub use adapter::QueryAdapter;
pub use error::{Error, ErrorSource};
pub use variable::{
    HandledError, MetricFindQuery, MetricFindRequest, MetricFindValue, TimeOut, VariableQuery,
    VariableQueryOptions, VariableQueryResponse,
};

/// The path of Grafana's generic query endpoint.
pub const QUERY_ENDPOINT: &str = "/api/ds/query";

/// Re-export of `async_trait`, so capability implementations don't need to depend on it directly.
pub use async_trait::async_trait;
