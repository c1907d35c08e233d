use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::format::{Format, Writer},
    EnvFilter,
};

struct CustomTimer;

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} - {}", now.format("%d %B"), now.format("%H:%M:%S%.3f"))
    }
}

// client libraries are chatty at debug level
const QUIET_DEPENDENCIES: [&str; 4] =
    ["tokio_postgres=warn", "hyper=warn", "reqwest=warn", "hyper_util=warn"];

/// Parses a `--log-level` value such as `info` or `DEBUG`.
pub fn parse_log_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse().ok()
}

pub fn setup_logger(log_level: LevelFilter) {
    let mut filter = EnvFilter::from_default_env().add_directive(log_level.into());
    for directive in QUIET_DEPENDENCIES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let format = Format::default().with_timer(CustomTimer).with_level(true).with_target(false);

    let subscriber =
        tracing_subscriber::fmt().with_env_filter(filter).event_format(format).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Logger has already been set up, continuing...");
    }
}

pub fn setup_info_logger() {
    setup_logger(LevelFilter::INFO);
}
