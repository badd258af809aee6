use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "KUBERT_LOG";

/// Pick the filter directive: `--debug` wins, then `KUBERT_LOG`, then `warn`.
pub fn filter_directive(debug: bool, env_value: Option<&str>) -> String {
    if debug {
        return "debug".to_string();
    }
    match env_value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => "warn".to_string(),
    }
}

/// Install the stderr subscriber. Safe to call more than once; later calls are no-ops.
pub fn init(debug: bool) {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let directive = filter_directive(debug, env_value.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
