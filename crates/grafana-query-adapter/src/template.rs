/*! Template variable interpolation.

The adapter never interpolates query text itself; it calls a [`TemplateSubstitution`]
implementation handed to it at construction time. [`TemplateSrv`] is the built-in
implementation, understanding the variable syntaxes used in Grafana dashboards:

- `$var`
- `${var}` and `${var:format}`
- `[[var]]` and `[[var:format]]` (deprecated, but still found in older dashboards)

Variables that are not known are left untouched.

```
use grafana_query_adapter::template::{
    ScopedVar, ScopedVars, TemplateSrv, TemplateSubstitution, VariableValue,
};

let srv = TemplateSrv::new().with_variable("env", "prod");
let mut scoped_vars = ScopedVars::new();
scoped_vars.insert(
    "host".to_string(),
    ScopedVar::new(VariableValue::Multi(vec!["a".into(), "b".into()])),
);

assert_eq!(
    srv.replace("SELECT * FROM $env WHERE host IN (${host:singlequote})", &scoped_vars)
        .unwrap(),
    "SELECT * FROM prod WHERE host IN ('a','b')",
);
```
*/
use std::{collections::HashMap, str::FromStr, sync::LazyLock};

use itertools::Itertools;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Current variable values supplied by the host for a single request, keyed by variable name.
pub type ScopedVars = HashMap<String, ScopedVar>;

/// The current value of a single scoped variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopedVar {
    /// The display text of the value.
    #[serde(default)]
    pub text: Value,
    /// The value substituted into queries.
    pub value: VariableValue,
}

impl ScopedVar {
    /// Create a scoped variable whose display text mirrors its value.
    pub fn new(value: impl Into<VariableValue>) -> Self {
        let value = value.into();
        let text = match &value {
            VariableValue::Single(s) => Value::from(s.as_str()),
            VariableValue::Multi(v) => Value::from(v.join(" + ")),
        };
        Self { text, value }
    }
}

/// A variable value: either a single string or, for multi-value variables, a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    /// A single value.
    Single(String),
    /// Several selected values.
    Multi(Vec<String>),
}

impl From<&str> for VariableValue {
    fn from(other: &str) -> Self {
        Self::Single(other.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(other: String) -> Self {
        Self::Single(other)
    }
}

impl From<Vec<String>> for VariableValue {
    fn from(other: Vec<String>) -> Self {
        Self::Multi(other)
    }
}

/// Errors returned by a [`TemplateSubstitution`] implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// A value could not be formatted as JSON.
    #[error("could not format value as JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Any other error raised by a custom implementation.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TemplateError {
    /// Wrap an arbitrary error raised by a custom [`TemplateSubstitution`].
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }
}

/// Interpolates variable references in query text.
///
/// Implementations must be synchronous and free of side effects visible to the adapter.
pub trait TemplateSubstitution: Send + Sync {
    /// Replace every recognised variable reference in `text` using `scoped_vars`.
    fn replace(&self, text: &str, scoped_vars: &ScopedVars) -> Result<String, TemplateError>;
}

/// How the value of a variable is rendered into query text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum VariableFormat {
    /// Single values raw, multiple values as `{a,b}`.
    #[default]
    Glob,
    /// Values joined by commas, without escaping.
    Raw,
    /// Values joined by commas.
    Csv,
    /// Values joined by `|`.
    Pipe,
    /// The value as a JSON string or array.
    Json,
    /// Each value in single quotes, joined by commas.
    SingleQuote,
    /// Each value in double quotes, joined by commas.
    DoubleQuote,
    /// Each value as an SQL string literal, joined by commas.
    SqlString,
    /// Regex-escaped; multiple values as an alternation `(a|b)`.
    Regex,
}

/// The error returned when parsing an unrecognised format name.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown variable format {0:?}")]
pub struct UnknownFormat(String);

impl FromStr for VariableFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "glob" => Self::Glob,
            "raw" => Self::Raw,
            "csv" => Self::Csv,
            "pipe" => Self::Pipe,
            "json" => Self::Json,
            "singlequote" => Self::SingleQuote,
            "doublequote" => Self::DoubleQuote,
            "sqlstring" => Self::SqlString,
            "regex" => Self::Regex,
            other => return Err(UnknownFormat(other.to_string())),
        })
    }
}

impl VariableFormat {
    /// Render `value` according to this format.
    pub fn apply(self, value: &VariableValue) -> Result<String, TemplateError> {
        let values = match value {
            VariableValue::Single(s) => std::slice::from_ref(s),
            VariableValue::Multi(v) => v.as_slice(),
        };
        Ok(match self {
            Self::Glob => match values {
                [single] => single.clone(),
                many => format!("{{{}}}", many.join(",")),
            },
            Self::Raw | Self::Csv => values.join(","),
            Self::Pipe => values.join("|"),
            Self::Json => match value {
                VariableValue::Single(s) => serde_json::to_string(s)?,
                VariableValue::Multi(v) => serde_json::to_string(v)?,
            },
            Self::SingleQuote => values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "\\'")))
                .join(","),
            Self::DoubleQuote => values
                .iter()
                .map(|v| format!("\"{}\"", v.replace('"', "\\\"")))
                .join(","),
            Self::SqlString => values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .join(","),
            Self::Regex => match values {
                [single] => regex::escape(single),
                many => format!("({})", many.iter().map(|v| regex::escape(v)).join("|")),
            },
        })
    }
}

// `$var`, `[[var]]`, `[[var:format]]`, `${var}` and `${var:format}`.
static VARIABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\w+)|\[\[(\w+?)(?::(\w+))?\]\]|\$\{(\w+)(?::([^}]+))?\}")
        .expect("variable pattern is valid")
});

/// The built-in [`TemplateSubstitution`] implementation.
///
/// Dashboard-level variables may be registered with [`TemplateSrv::with_variable`];
/// scoped variables passed to [`TemplateSubstitution::replace`] take precedence over them.
#[derive(Clone, Debug, Default)]
pub struct TemplateSrv {
    variables: HashMap<String, VariableValue>,
}

impl TemplateSrv {
    /// Create a template service with no dashboard variables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new template service with an additional dashboard variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    fn lookup<'a>(&'a self, name: &str, scoped_vars: &'a ScopedVars) -> Option<&'a VariableValue> {
        scoped_vars
            .get(name)
            .map(|v| &v.value)
            .or_else(|| self.variables.get(name))
    }

    fn render(&self, caps: &Captures<'_>, scoped_vars: &ScopedVars) -> Result<Option<String>, TemplateError> {
        let Some(name) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(4)) else {
            return Ok(None);
        };
        let Some(value) = self.lookup(name.as_str(), scoped_vars) else {
            return Ok(None);
        };
        let format = match caps.get(3).or_else(|| caps.get(5)) {
            Some(f) => f.as_str().parse().unwrap_or_else(|e: UnknownFormat| {
                tracing::warn!(variable = name.as_str(), "{e}, falling back to glob");
                VariableFormat::default()
            }),
            None => VariableFormat::default(),
        };
        format.apply(value).map(Some)
    }
}

impl TemplateSubstitution for TemplateSrv {
    fn replace(&self, text: &str, scoped_vars: &ScopedVars) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in VARIABLE_PATTERN.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            match self.render(&caps, scoped_vars)? {
                Some(rendered) => out.push_str(&rendered),
                None => out.push_str(whole.as_str()),
            }
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}
