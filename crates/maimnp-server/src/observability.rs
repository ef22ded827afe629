// Tracing initialization with a configurable and reloadable log level.
use maimnp_cache::events::EVENT_TARGET;
use std::sync::OnceLock;
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    // Prefer RUST_LOG from env, otherwise use provided level string.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(output_layers(std::io::stdout))
        .try_init();
}

/// Apply a new logging level at runtime if the reload handle is configured.
/// `RUST_LOG` keeps precedence when set.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = EnvFilter::new(level);
        });
    }
}

/// Human-readable output for ordinary events, plus one bare JSON line per
/// cache event.
pub fn output_layers<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    let text = fmt::layer()
        .with_writer(writer.clone())
        .with_filter(filter::filter_fn(|meta| !is_cache_event(meta)));
    let cache_events = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .event_format(MessageOnly)
        .with_filter(filter::filter_fn(is_cache_event));
    text.and_then(cache_events)
}

fn is_cache_event(meta: &Metadata<'_>) -> bool {
    meta.target() == EVENT_TARGET
}

/// Writes the event message alone: no timestamp, level, target or span scope.
struct MessageOnly;

impl<S, N> FormatEvent<S, N> for MessageOnly
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
