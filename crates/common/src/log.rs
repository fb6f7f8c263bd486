use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter keeps third-party crates quiet while our own crates log.
const DEFAULT_DIRECTIVES: &str = "warn,bpsr_packet=info,bpsr_meter=info";

pub fn init(log_level: Option<String>) {
    let fallback = match log_level {
        Some(level) => format!("warn,bpsr_packet={level},bpsr_meter={level}"),
        None => DEFAULT_DIRECTIVES.to_string(),
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}
