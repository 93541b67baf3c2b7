// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! JSON structured logging, grounded on the teacher's `cfg::logger` module
//! (custom `FormatEvent` + span-field capture) but driven by
//! [`GatewaySettings`] instead of a separate YAML logger config — this
//! crate already has one environment-driven settings struct and doesn't
//! need a second file format just for log output.

use std::{fmt::Debug, path::Path};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{Event, Subscriber, span};
use tracing_appender::{non_blocking::WorkerGuard, rolling::{RollingFileAppender, Rotation}};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FmtContext, FormatEvent, FormatFields, format::{JsonFields, Writer}, writer::BoxMakeWriter},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
};

use crate::cfg::config::GatewaySettings;

#[derive(Default, Debug)]
struct SpanFields(serde_json::Map<String, serde_json::Value>);

struct CaptureSpanFieldsLayer;

impl<S> Layer<S> for CaptureSpanFieldsLayer
where S: Subscriber + for<'a> LookupSpan<'a>
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut map = serde_json::Map::with_capacity(8);
            attrs.record(&mut JsonVisitor { fields: &mut map });
            span.extensions_mut().insert(SpanFields(map));
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(fields) = span.extensions_mut().get_mut::<SpanFields>()
        {
            values.record(&mut JsonVisitor { fields: &mut fields.0 });
        }
    }
}

struct JsonFormatter;

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    level: String,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        let mut fields = serde_json::Map::new();
        event.record(&mut JsonVisitor { fields: &mut fields });

        if let Some(scope) = ctx.event_scope() {
            let mut span_names = Vec::with_capacity(8);
            for span in scope.from_root() {
                span_names.push(span.name().to_string());
                if let Some(ext) = span.extensions().get::<SpanFields>() {
                    for (k, v) in &ext.0 {
                        fields.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            fields.insert("span_names".to_string(), json!(span_names));
        }

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            line: event.metadata().line(),
            fields,
        };

        writeln!(writer, "{}", serde_json::to_string(&entry).map_err(|_| std::fmt::Error)?)
    }
}

struct JsonVisitor<'a> {
    fields: &'a mut serde_json::Map<String, serde_json::Value>,
}

impl tracing::field::Visit for JsonVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn Debug) {
        self.fields.insert(field.name().to_string(), json!(format!("{value:?}")));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

/// Installs the global subscriber. Logs to `settings.log_file_path` when it
/// names an existing parent directory, otherwise falls back to stdout — so
/// the demo binary works unmodified in a container with no writable volume.
pub fn init_logger(settings: &GatewaySettings) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_new(&settings.log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log level")?;

    let (writer, guard) = make_writer(&settings.log_file_path);

    let json_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .json()
        .event_format(JsonFormatter)
        .fmt_fields(JsonFields::default());

    let subscriber = Registry::default().with(env_filter).with(CaptureSpanFieldsLayer).with(json_layer);

    tracing::subscriber::set_global_default(subscriber).context("failed to set global default subscriber")?;
    Ok(guard)
}

fn make_writer(log_file_path: &str) -> (BoxMakeWriter, WorkerGuard) {
    let path = Path::new(log_file_path);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty() && p.is_dir());

    match dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, path.file_name().unwrap_or_default());
            let (w, g) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(w), g)
        }
        None => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (BoxMakeWriter::new(w), g)
        }
    }
}
