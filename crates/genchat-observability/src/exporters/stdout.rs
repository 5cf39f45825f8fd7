use tracing_subscriber::fmt::format::FmtSpan;

/// Where formatted log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogExporterKind {
    Stdout,
    None,
}

pub fn parse_log_exporter_kind(raw: &str) -> LogExporterKind {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" | "off" => LogExporterKind::None,
        _ => LogExporterKind::Stdout,
    }
}

pub fn span_events_mask(log_span_events: bool) -> FmtSpan {
    if log_span_events { FmtSpan::NEW | FmtSpan::CLOSE } else { FmtSpan::NONE }
}
