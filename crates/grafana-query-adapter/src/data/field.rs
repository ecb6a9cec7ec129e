//! Contains the `Field` struct, a single named column of a [`Frame`][crate::data::Frame].
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

/// A column within a [`Frame`][crate::data::Frame].
///
/// Values are kept as raw JSON values, exactly as the query endpoint returned them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Field {
    /// The name of this field.
    pub name: String,
    /// An optional set of key-value pairs that, combined with the name, identify a field within a frame.
    pub labels: BTreeMap<String, String>,
    /// Display configuration attached to the field by the datasource.
    pub config: Option<Map<String, Value>>,
    /// The simple type of the field, if the schema declared one.
    pub type_: Option<SimpleType>,
    /// Detailed type information, if the schema declared it.
    pub type_info: Option<TypeInfo>,

    pub(crate) values: Vec<Value>,
}

impl Field {
    /// Create a new field with the given name and values.
    ///
    /// ```
    /// use grafana_query_adapter::data::Field;
    ///
    /// let field = Field::new("host", ["web-1", "web-2"]);
    /// assert_eq!(field.values().len(), 2);
    /// ```
    pub fn new<V>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<Value>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Return a new field with the given simple type.
    #[must_use]
    pub fn with_type(mut self, type_: SimpleType) -> Self {
        self.type_ = Some(type_);
        self
    }

    /// Return a new field with the given labels.
    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// The values of this field, in order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the field, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Detailed type information for a field, as written by the Go SDK.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfo {
    /// The concrete type, e.g. `int64`, `string` or `time.Time`.
    pub frame: String,
    /// Is this type nullable?
    #[serde(default)]
    pub nullable: Option<bool>,
}

/// The 'simple' type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum SimpleType {
    /// A number.
    Number,
    /// A boolean.
    Boolean,
    /// A string.
    String,
    /// A timestamp.
    Time,
    /// Any other type understood by Grafana (`enum`, `frame`, `trace`, ...).
    #[serde(other)]
    Other,
}
