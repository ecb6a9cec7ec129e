//! Parsing of bodies returned by the generic query endpoint.
use serde::Deserialize;
use serde_with::serde_as;

use crate::data::{Error, Frame};

/// The structured form of a query endpoint response.
///
/// `data` holds every frame of every result, in the order the endpoint returned them.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct QueryResponse {
    /// All frames across all results.
    pub data: Vec<Frame>,
    /// Errors reported for individual queries.
    pub errors: Vec<QueryResultError>,
}

/// An error reported by the endpoint for a single query.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct QueryResultError {
    /// The ref ID of the query the error belongs to.
    pub ref_id: String,
    /// The error message.
    pub message: String,
    /// The status code reported for the query, if any.
    pub status: Option<u16>,
    /// Whether the endpoint attributed the error to the plugin or downstream.
    pub error_source: Option<String>,
}

impl QueryResponse {
    /// Create a response containing the given frames and no errors.
    #[must_use]
    pub fn new(data: Vec<Frame>) -> Self {
        Self {
            data,
            errors: vec![],
        }
    }

    /// Parse the raw body returned by the query endpoint.
    ///
    /// An empty body is treated as a response without results.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON or any frame is malformed.
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        let body = if body.is_empty() {
            b"{}".as_slice()
        } else {
            body
        };
        let raw: RawQueryResponse = serde_json::from_slice(body)?;
        Ok(raw.into())
    }

    /// The first error reported for any query, if there was one.
    #[must_use]
    pub fn error(&self) -> Option<&QueryResultError> {
        self.errors.first()
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct RawQueryResponse {
    // A JSON object whose order must be kept, so read it as a list of pairs.
    #[serde_as(as = "serde_with::Map<_, _>")]
    #[serde(default)]
    results: Vec<(String, RawQueryResult)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQueryResult {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    frames: Option<Vec<Frame>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_source: Option<String>,
}

impl From<RawQueryResponse> for QueryResponse {
    fn from(other: RawQueryResponse) -> Self {
        let mut response = QueryResponse::default();
        for (ref_id, result) in other.results {
            if let Some(message) = result.error.filter(|e| !e.is_empty()) {
                response.errors.push(QueryResultError {
                    ref_id: ref_id.clone(),
                    message,
                    status: result.status,
                    error_source: result.error_source.filter(|s| !s.is_empty()),
                });
            }
            response
                .data
                .extend(result.frames.unwrap_or_default().into_iter().map(|mut f| {
                    if f.ref_id.as_deref().map_or(true, str::is_empty) {
                        f.ref_id = Some(ref_id.clone());
                    }
                    f
                }));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keeps_result_and_frame_order() {
        // Written out by hand: `json!` would sort the result keys.
        let body = br#"{
            "results": {
                "Z": {"status": 200, "frames": [
                    {"schema": {"name": "z1", "fields": [{"name": "v"}]}, "data": {"values": [[1]]}},
                    {"schema": {"name": "z2", "fields": [{"name": "v"}]}, "data": {"values": [[2]]}}
                ]},
                "A": {"status": 200, "frames": [
                    {"schema": {"name": "a1", "fields": [{"name": "v"}]}, "data": {"values": [[3]]}}
                ]}
            }
        }"#;
        let response = QueryResponse::from_slice(body).unwrap();
        let names: Vec<_> = response.data.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["z1", "z2", "a1"]);
        let ref_ids: Vec<_> = response
            .data
            .iter()
            .map(|f| f.ref_id.as_deref().unwrap())
            .collect();
        assert_eq!(ref_ids, vec!["Z", "Z", "A"]);
        assert!(response.errors.is_empty());
    }

    #[test]
    fn collects_per_query_errors() {
        let body = br#"{
            "results": {
                "A": {"status": 400, "error": "syntax error", "errorSource": "downstream"},
                "B": {"frames": [{"schema": {"refId": "own", "fields": [{"name": "v"}]},
                                  "data": {"values": [["x"]]}}]}
            }
        }"#;
        let response = QueryResponse::from_slice(body).unwrap();
        assert_eq!(
            response.error(),
            Some(&QueryResultError {
                ref_id: "A".to_string(),
                message: "syntax error".to_string(),
                status: Some(400),
                error_source: Some("downstream".to_string()),
            })
        );
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].ref_id.as_deref(), Some("own"));
    }

    #[test]
    fn empty_bodies_have_no_results() {
        assert_eq!(QueryResponse::from_slice(b"").unwrap(), QueryResponse::default());
        assert_eq!(
            QueryResponse::from_slice(b"{}").unwrap(),
            QueryResponse::default()
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            QueryResponse::from_slice(b"<html>"),
            Err(Error::Json(_))
        ));
    }
}
