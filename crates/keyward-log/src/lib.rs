// ABOUTME: Shared logging setup for keyward binaries
// ABOUTME: Logs always go to stderr so stdout stays reserved for key material

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    init_with(Level::INFO);
}

/// Logging to stderr at the given default level. RUST_LOG still wins when set.
///
/// The provisioning layer captures stdout as the requested artifact, so the
/// subscriber must never write there.
pub fn init_with(level: Level) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter_for(level))
        .init();
}

/// Map `-v`/`-q` counts onto a default level. Zero of both is INFO.
pub fn level_from_flags(verbose: u8, quiet: u8) -> Level {
    match i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-2 => Level::ERROR,
        -1 => Level::WARN,
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}
