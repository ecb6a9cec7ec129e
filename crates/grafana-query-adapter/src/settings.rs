//! Settings of the datasource instance the adapter works on behalf of.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// Settings for a datasource instance.
///
/// A datasource is a datasource plugin of a certain type that has been configured
/// and created in a Grafana organisation. These settings are handed to the adapter
/// by the host, in the same JSON shape Grafana uses for its frontend instance settings.
///
/// ```
/// use grafana_query_adapter::settings::DataSourceInstanceSettings;
///
/// let settings: DataSourceInstanceSettings = serde_json::from_str(
///     r#"{"id": 3, "uid": "P1809F7CD0C75ACF3", "type": "my-ds", "name": "Warehouse"}"#,
/// ).unwrap();
/// assert_eq!(settings.id, 3);
/// assert_eq!(settings.org_id(), 3);
/// ```
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DataSourceInstanceSettings {
    /// The Grafana assigned numeric identifier of the datasource instance.
    pub id: i64,

    /// The Grafana assigned string identifier of the datasource instance.
    #[serde(default)]
    pub uid: String,

    /// The plugin ID of the datasource.
    #[serde(rename = "type", default)]
    pub type_: String,

    /// The configured name of the datasource instance.
    #[serde(default)]
    pub name: String,

    /// The configured URL of the datasource instance.
    #[serde(default)]
    pub url: Option<String>,

    /// An explicit organisation ID to send with variable queries.
    ///
    /// When unset, the datasource's own `id` is sent in its place, which is what
    /// existing backends expect.
    #[serde(default)]
    pub org_id: Option<i64>,

    /// The datasource's custom configuration.
    #[serde(default)]
    pub json_data: Value,
}

impl DataSourceInstanceSettings {
    /// Create settings for the datasource with the given numeric and string identifiers.
    pub fn new(id: i64, uid: impl Into<String>) -> Self {
        Self {
            id,
            uid: uid.into(),
            ..Default::default()
        }
    }

    /// Return new settings with the given plugin type.
    #[must_use]
    pub fn with_type(mut self, type_: impl Into<String>) -> Self {
        self.type_ = type_.into();
        self
    }

    /// Return new settings carrying an explicit organisation ID.
    #[must_use]
    pub fn with_org_id(mut self, org_id: i64) -> Self {
        self.org_id = Some(org_id);
        self
    }

    /// The organisation ID sent with variable queries.
    #[must_use]
    pub fn org_id(&self) -> i64 {
        self.org_id.unwrap_or(self.id)
    }

    /// A reference to this datasource, as attached to outgoing queries.
    #[must_use]
    pub fn datasource_ref(&self) -> DataSourceRef {
        DataSourceRef {
            uid: Some(self.uid.clone()).filter(|u| !u.is_empty()),
            type_: Some(self.type_.clone()).filter(|t| !t.is_empty()),
        }
    }
}

/// A reference to a datasource by UID and type.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceRef {
    /// The datasource UID.
    #[serde(default)]
    pub uid: Option<String>,
    /// The datasource plugin type.
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn org_id_defaults_to_datasource_id() {
        let settings = DataSourceInstanceSettings::new(12, "uid");
        assert_eq!(settings.org_id(), 12);
        assert_eq!(settings.with_org_id(1).org_id(), 1);
    }

    #[test]
    fn deserializes_frontend_settings() {
        let settings: DataSourceInstanceSettings = serde_json::from_value(json!({
            "id": 5,
            "uid": "abc",
            "type": "acme-datasource",
            "name": "Acme",
            "url": "/api/datasources/proxy/5",
            "access": "proxy",
            "jsonData": {"defaultTimeout": 30}
        }))
        .unwrap();
        assert_eq!(settings.type_, "acme-datasource");
        assert_eq!(settings.json_data["defaultTimeout"], json!(30));
        assert_eq!(
            serde_json::to_value(settings.datasource_ref()).unwrap(),
            json!({"uid": "abc", "type": "acme-datasource"})
        );
    }
}
