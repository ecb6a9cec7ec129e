//! Variable queries: the values offered by dashboard variable pickers.
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::{
    data::{self, Frame},
    template::ScopedVars,
    Error,
};

/// A query whose results populate the selectable values of a template variable.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct VariableQuery {
    /// The query text, which may reference other template variables.
    #[serde(default)]
    pub query_text: Option<String>,
    /// The server-side timeout in seconds, as entered by the user.
    #[serde(default)]
    pub time_out: Option<String>,
}

impl VariableQuery {
    /// Create a variable query with the given text and no timeout.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: Some(query_text.into()),
            time_out: None,
        }
    }

    /// Return a new query with the given timeout string.
    #[must_use]
    pub fn with_time_out(mut self, time_out: impl Into<String>) -> Self {
        self.time_out = Some(time_out.into());
        self
    }

    /// The parsed timeout.
    #[must_use]
    pub fn parsed_time_out(&self) -> TimeOut {
        self.time_out.as_deref().map_or(TimeOut::Invalid, TimeOut::parse)
    }
}

/// Options accompanying a variable query.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct VariableQueryOptions {
    /// The current values of other template variables.
    pub scoped_vars: ScopedVars,
}

impl VariableQueryOptions {
    /// Create options with the given scoped variables.
    pub fn new(scoped_vars: ScopedVars) -> Self {
        Self { scoped_vars }
    }
}

/// A timeout parsed from user input.
///
/// Parsing mirrors what the query editor has always done: leading whitespace
/// (including a byte order mark) is skipped, an optional sign is accepted, and the
/// longest run of decimal digits that follows is used (`"30s"` is 30). No range
/// checks are made. Digit runs too long for an `i64` are kept as the nearest
/// `f64`. Input without any digits becomes [`TimeOut::Invalid`], which is sent to
/// the backend as `null` so that it can reject the query itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeOut {
    /// A timeout in seconds.
    Seconds(i64),
    /// A timeout in seconds that does not fit in an `i64`.
    Large(f64),
    /// The input was not a number.
    Invalid,
}

impl TimeOut {
    /// Parse a timeout string.
    ///
    /// ```
    /// use grafana_query_adapter::TimeOut;
    ///
    /// assert_eq!(TimeOut::parse("30"), TimeOut::Seconds(30));
    /// assert_eq!(TimeOut::parse(" -5m"), TimeOut::Seconds(-5));
    /// assert_eq!(TimeOut::parse("99999999999999999999"), TimeOut::Large(1e20));
    /// assert_eq!(TimeOut::parse("abc"), TimeOut::Invalid);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let s = s.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
        let (negative, rest) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let end = rest
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(rest.len());
        if end == 0 {
            return Self::Invalid;
        }
        let digits = &rest[..end];
        let signed = if negative {
            format!("-{digits}")
        } else {
            digits.to_string()
        };
        match signed.parse::<i64>() {
            Ok(n) => Self::Seconds(n),
            // Only overflow is possible here; the float parse cannot fail on digits.
            Err(_) => signed.parse::<f64>().map_or(Self::Invalid, Self::Large),
        }
    }

    /// The number of seconds, if valid and representable as an `i64`.
    #[must_use]
    pub fn seconds(self) -> Option<i64> {
        match self {
            Self::Seconds(s) => Some(s),
            Self::Large(_) | Self::Invalid => None,
        }
    }
}

impl Serialize for TimeOut {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Seconds(n) => s.serialize_i64(*n),
            Self::Large(n) => s.serialize_f64(*n),
            Self::Invalid => s.serialize_none(),
        }
    }
}

/// A single selectable value produced by a variable query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricFindValue {
    /// The value, exactly as returned by the backend.
    pub text: Value,
}

impl MetricFindValue {
    /// The text of the placeholder value returned when a variable query fails.
    pub const ERROR_TEXT: &'static str = "ERROR";

    /// Create a new value.
    pub fn new(text: impl Into<Value>) -> Self {
        Self { text: text.into() }
    }

    /// The placeholder value returned when a variable query fails.
    #[must_use]
    pub fn error() -> Self {
        Self::new(Self::ERROR_TEXT)
    }
}

/// The body sent to the query endpoint to resolve a variable query.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[non_exhaustive]
pub struct MetricFindRequest {
    /// The queries to run; always exactly one.
    pub queries: Vec<MetricFindQuery>,
}

/// The single query carried by a [`MetricFindRequest`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct MetricFindQuery {
    /// The numeric ID of the datasource.
    pub datasource_id: i64,
    /// The organisation ID; the datasource ID unless explicitly configured.
    pub org_id: i64,
    /// The fully interpolated query text.
    pub query_text: String,
    /// The server-side timeout.
    pub time_out: TimeOut,
}

impl MetricFindRequest {
    pub(crate) fn single(query: MetricFindQuery) -> Self {
        Self {
            queries: vec![query],
        }
    }
}

/// An error that has been logged and must not be reported to the user again.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct HandledError {
    #[source]
    error: Error,
    is_handled: bool,
}

impl HandledError {
    pub(crate) fn new(error: Error) -> Self {
        Self {
            error,
            is_handled: true,
        }
    }

    /// The underlying error.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Whether the error has already been reported, so the host should not show it again.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.is_handled
    }

    /// Consume the wrapper, returning the underlying error.
    #[must_use]
    pub fn into_inner(self) -> Error {
        self.error
    }
}

/// The outcome of resolving a variable query.
///
/// On failure `values` holds the single placeholder [`MetricFindValue::error`] and
/// `error` holds the cause; callers that only look at the values cannot tell a
/// failed query from one returning the text `"ERROR"`.
#[derive(Debug)]
#[non_exhaustive]
pub struct VariableQueryResponse {
    /// The values to offer in the variable picker.
    pub values: Vec<MetricFindValue>,
    /// The error that occurred, if any.
    pub error: Option<HandledError>,
}

impl VariableQueryResponse {
    pub(crate) fn ok(values: Vec<MetricFindValue>) -> Self {
        Self {
            values,
            error: None,
        }
    }

    pub(crate) fn handled(error: Error) -> Self {
        Self {
            values: vec![MetricFindValue::error()],
            error: Some(HandledError::new(error)),
        }
    }

    /// Whether resolving the query failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Consume the response, returning just the values.
    #[must_use]
    pub fn into_values(self) -> Vec<MetricFindValue> {
        self.values
    }
}

// The host only ever sees the values.
impl Serialize for VariableQueryResponse {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(s)
    }
}

/// Flatten the first field of every frame, in frame order, into metric find values.
pub(crate) fn flatten_first_fields(frames: &[Frame]) -> Result<Vec<MetricFindValue>, data::Error> {
    frames.iter().try_fold(Vec::new(), |mut acc, frame| {
        let field = frame.fields().first().ok_or_else(|| data::Error::NoFields {
            frame: frame.name.clone(),
        })?;
        acc.extend(field.values().iter().cloned().map(MetricFindValue::new));
        Ok(acc)
    })
}
