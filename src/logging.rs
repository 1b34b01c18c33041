use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::Uptime;

use crate::config;

/// Install the global subscriber, writing to stderr.
///
/// The filter comes from the directives compiled into the build, never from the environment.
/// Call this before hardening: afterwards the environment is gone and new descriptors are scarce.
pub fn configure_logging() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::OFF.into())
        .parse_lossy(config::LOG_DIRECTIVES);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_timer(Uptime::default())
        .with_span_events(FmtSpan::CLOSE | FmtSpan::NEW)
        .with_target(false)
        .init();
}
