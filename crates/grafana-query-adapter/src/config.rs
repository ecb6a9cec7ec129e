//! Settings Grafana hands to the adapter through `GF_*` environment variables.
use std::{collections::HashMap, fmt};

/// A `GF_*` option needed by the adapter was not set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{option} is not set; the Grafana server may be too old to provide it")]
pub struct ConfigError {
    option: &'static str,
}

impl ConfigError {
    /// The name of the missing environment variable.
    #[must_use]
    pub fn option(&self) -> &'static str {
        self.option
    }
}

/// The `GF_*` options the adapter reads: where Grafana lives and how to authenticate to it.
#[derive(Clone, Default)]
pub struct GrafanaConfig {
    options: HashMap<String, String>,
}

impl GrafanaConfig {
    const PREFIX: &'static str = "GF_";
    const APP_URL: &'static str = "GF_APP_URL";
    const APP_CLIENT_SECRET: &'static str = "GF_PLUGIN_APP_CLIENT_SECRET";

    /// Build a config from explicit options, e.g. in tests.
    pub fn new(options: HashMap<String, String>) -> Self {
        Self { options }
    }

    /// Collect every `GF_*` variable of the current process.
    pub fn from_env() -> Self {
        Self::new(
            std::env::vars()
                .filter(|(name, _)| name.starts_with(Self::PREFIX))
                .collect(),
        )
    }

    fn require(&self, option: &'static str) -> Result<&String, ConfigError> {
        self.options.get(option).ok_or(ConfigError { option })
    }

    /// The base URL that requests to `/api/ds/query` are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if `GF_APP_URL` is not set.
    pub fn app_url(&self) -> Result<&String, ConfigError> {
        self.require(Self::APP_URL)
    }

    /// The service account token sent as a bearer token with every query.
    ///
    /// Grafana only sets this for plugins that declare an IAM service account.
    ///
    /// # Errors
    ///
    /// Returns an error if `GF_PLUGIN_APP_CLIENT_SECRET` is not set.
    pub fn plugin_app_client_secret(&self) -> Result<&String, ConfigError> {
        self.require(Self::APP_CLIENT_SECRET)
    }
}

// Values may hold credentials; only the option names are shown.
impl fmt::Debug for GrafanaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.options.keys().collect();
        names.sort();
        f.debug_struct("GrafanaConfig")
            .field("options", &names)
            .finish()
    }
}
