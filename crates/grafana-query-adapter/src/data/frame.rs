//! Data frames and their JSON representation.
use std::{collections::BTreeMap, fmt};

use serde::{
    de::{Deserializer, Error as _, IgnoredAny, MapAccess, Visitor},
    Deserialize,
};
use serde_json::{Map, Value};

use crate::data::field::{Field, SimpleType, TypeInfo};

/// A structured, two-dimensional data frame as returned by the query endpoint.
///
/// Frames are read-only from the adapter's point of view: they are deserialized from
/// the JSON representation written by Grafana (a `schema` object describing the fields,
/// plus a `data` object holding one array of values per field).
///
/// # Example
///
/// ```rust
/// use grafana_query_adapter::data::Frame;
///
/// let frame: Frame = serde_json::from_str(r#"{
///     "schema": {"name": "hosts", "refId": "A", "fields": [{"name": "host"}]},
///     "data": {"values": [["web-1", "web-2"]]}
/// }"#).unwrap();
/// assert_eq!(frame.name, "hosts");
/// assert_eq!(frame["host"].values().len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    /// The name of this frame.
    pub name: String,

    /// The ID of the query that produced this frame.
    ///
    /// Frames without an explicit `refId` inherit the one of the result they were returned in.
    pub ref_id: Option<String>,

    /// Optional metadata describing this frame, kept as raw JSON.
    pub meta: Option<Map<String, Value>>,

    fields: Vec<Field>,
}

impl Frame {
    /// Create a new, empty `Frame` with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Return a new frame with an added field.
    ///
    /// ```rust
    /// use grafana_query_adapter::data::{Field, Frame};
    ///
    /// let frame = Frame::new("frame")
    ///     .with_field(Field::new("x", [1, 2, 3]))
    ///     .with_field(Field::new("y", ["a", "b", "c"]));
    /// assert_eq!(frame.fields().len(), 2);
    /// assert_eq!(&frame.fields()[1].name, "y");
    /// ```
    #[must_use]
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Return a new frame with the given ref ID.
    #[must_use]
    pub fn with_ref_id(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    /// Get an immutable reference to the `Field`s of this `Frame`.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

impl std::ops::Index<usize> for Frame {
    type Output = Field;
    fn index(&self, index: usize) -> &Self::Output {
        &self.fields()[index]
    }
}

impl std::ops::Index<&str> for Frame {
    type Output = Field;
    fn index(&self, name: &str) -> &Self::Output {
        self.fields().iter().find(|x| x.name == name).unwrap()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaField {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    config: Option<Map<String, Value>>,
    #[serde(rename = "type", default)]
    type_: Option<SimpleType>,
    #[serde(default)]
    type_info: Option<TypeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Schema {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ref_id: Option<String>,
    #[serde(default)]
    fields: Vec<SchemaField>,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct Data {
    #[serde(default)]
    values: Vec<Option<Vec<Value>>>,
}

impl From<(Schema, Data)> for Frame {
    /// Join the schema's field descriptions with the value columns found in `data`.
    ///
    /// Fields without a value column are left empty; value columns without a field are dropped.
    fn from((schema, data): (Schema, Data)) -> Self {
        let mut columns = data.values.into_iter();
        let fields = schema
            .fields
            .into_iter()
            .map(|f| Field {
                name: f.name,
                labels: f.labels.unwrap_or_default(),
                config: f.config,
                type_: f.type_,
                type_info: f.type_info,
                values: columns.next().flatten().unwrap_or_default(),
            })
            .collect();
        Frame {
            name: schema.name,
            ref_id: schema.ref_id,
            meta: schema.meta,
            fields,
        }
    }
}

// Deserialization from the JSON representation written by the Grafana backend.
//
// Keys other than `schema` and `data` are skipped so that newer servers adding
// extra sections don't break older adapters.
impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(field_identifier, rename_all = "lowercase")]
        enum Key {
            Schema,
            Data,
            #[serde(other)]
            Other,
        }

        struct FrameVisitor;

        impl<'de> Visitor<'de> for FrameVisitor {
            type Value = Frame;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct Frame")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Self::Value, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut schema: Option<Schema> = None;
                let mut data: Option<Data> = None;

                while let Some(key) = map.next_key()? {
                    match key {
                        Key::Schema => {
                            if schema.is_some() {
                                return Err(V::Error::duplicate_field("schema"));
                            }
                            schema = Some(map.next_value()?);
                        }
                        Key::Data => {
                            if data.is_some() {
                                return Err(V::Error::duplicate_field("data"));
                            }
                            data = Some(map.next_value()?);
                        }
                        Key::Other => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                let schema = schema.ok_or_else(|| V::Error::missing_field("schema"))?;
                Ok(Frame::from((schema, data.unwrap_or_default())))
            }
        }

        const FIELDS: &[&str] = &["schema", "data"];
        deserializer.deserialize_struct("Frame", FIELDS, FrameVisitor)
    }
}
