use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise `level` (from
/// `logging.level`) applies to everything.
pub fn init(level: &str) {
    // try_init: main may call this again on its error path
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .try_init();
}

pub(crate) fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)))
}

/// Normalises a configured level; anything unrecognised means `info`.
pub(crate) fn directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "off" => "off",
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}
