use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PACED_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

/// Installs the stderr subscriber; stdout carries only run output.
///
/// `PACED_LOG` wins over `RUST_LOG`; invalid directives fall back to `warn`.
pub fn init() {
    let filter = filter_from(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn filter_from(paced: Option<String>, rust: Option<String>) -> EnvFilter {
    paced
        .or(rust)
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}
