use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
pub mod exporters;

pub use config::{ObservabilityConfig, parse_truthy};
pub use exporters::stdout::{LogExporterKind, parse_log_exporter_kind, span_events_mask};

/// Installs the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_observability(service_name: &str, config: &ObservabilityConfig) {
    let fallback_filter = format!(
        "{level},genchat_app={level},genchat_core={level},genchat_clients={level}",
        level = config.log_level
    );
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = (config.log_exporter == LogExporterKind::Stdout).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stdout)
            .with_span_events(span_events_mask(config.log_span_events))
    });

    let installed =
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init().is_ok();
    if installed {
        tracing::info!(
            event = "observability.initialized",
            service = service_name,
            log_level = %config.log_level,
            span_events = config.log_span_events
        );
    }
}

pub fn init_tracing(service_name: &str) {
    init_observability(service_name, &ObservabilityConfig::from_env());
}
