//! Data types returned by the generic query endpoint.
//!
//! The endpoint answers with a JSON document holding one result per query, each of which
//! contains zero or more [`Frame`]s. Use [`QueryResponse::from_slice`] to parse such a body.
//!
//! ```
//! use grafana_query_adapter::data::QueryResponse;
//!
//! let body = br#"{
//!     "results": {
//!         "A": {
//!             "frames": [{
//!                 "schema": {"name": "hosts", "fields": [{"name": "host", "type": "string"}]},
//!                 "data": {"values": [["web-1", "web-2"]]}
//!             }]
//!         }
//!     }
//! }"#;
//! let response = QueryResponse::from_slice(body).unwrap();
//! assert_eq!(response.data[0].ref_id.as_deref(), Some("A"));
//! assert_eq!(response.data[0].fields()[0].values().len(), 2);
//! ```
mod error;
mod field;
mod frame;
mod response;

pub use error::Error;
pub use field::{Field, SimpleType, TypeInfo};
pub use frame::Frame;
pub use response::{QueryResponse, QueryResultError};
