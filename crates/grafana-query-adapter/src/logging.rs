//! Structured logging in the format expected by the Grafana server.
//!
//! Grafana reads plugin logs from stderr as [hclog] JSON lines: `@timestamp`, `@level`
//! and `@message` keys followed by any structured fields. The adapter itself only emits
//! [`tracing`] events; installing a subscriber is up to the host, either with
//! [`init_subscriber`] or by adding [`layer`] to an existing registry.
//!
//! [hclog]: https://github.com/hashicorp/go-hclog
use std::{fmt, io};

use chrono::prelude::*;
use serde_json::{Map, Value};
use tracing_core::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_log::NormalizeEvent;
use tracing_serde::AsSerde;
use tracing_subscriber::{
    fmt::{
        format::{JsonFields, Writer},
        FmtContext, FormatEvent, FormatFields, FormattedFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// A [`tracing`] event formatter writing one hclog-compatible JSON object per event.
///
/// Use [`layer`] to get a preconfigured formatting layer rather than using this directly.
#[derive(Debug, Default)]
pub struct HCLogJson {
    _priv: (),
}

impl<S, N> FormatEvent<S, N> for HCLogJson
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let normalized_meta = event.normalized_metadata();
        let meta = normalized_meta.as_ref().unwrap_or_else(|| event.metadata());

        let mut entry = Map::new();
        entry.insert(
            "@timestamp".to_string(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, false)
                .into(),
        );
        entry.insert(
            "@level".to_string(),
            serde_json::to_value(meta.level().as_serde()).map_err(|_| fmt::Error)?,
        );

        let mut visitor = FieldVisitor(&mut entry);
        event.record(&mut visitor);

        entry.insert("target".to_string(), meta.target().into());

        let span = event
            .parent()
            .and_then(|id| ctx.span(id))
            .or_else(|| ctx.lookup_current());
        if let Some(span) = span {
            let mut fields = span
                .extensions()
                .get::<FormattedFields<N>>()
                .and_then(|f| serde_json::from_str::<Map<String, Value>>(f).ok())
                .unwrap_or_default();
            fields.insert("name".to_string(), span.name().into());
            entry.insert("span".to_string(), fields.into());
        }

        let line = serde_json::to_string(&entry).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

/// Records event fields into a JSON map, moving the message to `@message`.
struct FieldVisitor<'a>(&'a mut Map<String, Value>);

impl FieldVisitor<'_> {
    fn insert(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.0.insert("@message".to_string(), value);
            }
            // Already folded into the normalized metadata.
            name if name.starts_with("log.") => {}
            name => {
                self.0.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}").into());
    }
}

/// Create a formatting [`Layer`][tracing_subscriber::fmt::Layer] writing hclog JSON to stderr.
///
/// ```rust
/// use grafana_query_adapter::logging;
/// use tracing_subscriber::{prelude::*, EnvFilter};
///
/// tracing_subscriber::registry()
///     .with(logging::layer())
///     .with(EnvFilter::from_default_env())
///     .init();
/// ```
pub fn layer<S: Subscriber + for<'a> LookupSpan<'a>>(
) -> tracing_subscriber::fmt::Layer<S, JsonFields, HCLogJson, fn() -> io::Stderr> {
    tracing_subscriber::fmt::layer()
        .with_writer(io::stderr as fn() -> io::Stderr)
        .event_format(HCLogJson::default())
        .fmt_fields(JsonFields::new())
}

/// Install [`layer`] as the global default subscriber.
///
/// Events are filtered using the `RUST_LOG` environment variable, defaulting to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_subscriber() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer())
        .with(filter)
        .try_init()
}
