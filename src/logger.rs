use tracing_subscriber::fmt::{SubscriberBuilder};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_appender::non_blocking::WorkerGuard;
use tracing::Level;

use crate::parse::LogConfig;



/// Level named in the config; unknown names fall back to INFO.
pub fn level(cfg: &LogConfig) -> Level {
    cfg.level.parse().unwrap_or(Level::INFO)
}

/*
    @@@
    @init();
    . With `log.dir` set: creates a daily-rotating log file (<dir>/vigil.log) wrapped in a non-blocking writer.
    . Without it: logs to stderr.
    . Installs the subscriber at the configured level and returns the appender guard, which must be kept alive.
*/
pub fn init(cfg: &LogConfig) -> Option<WorkerGuard> {
    let max_level = level(cfg);
    match &cfg.dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "vigil.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let subscriber = SubscriberBuilder::default()
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_writer(non_blocking)
                .with_max_level(max_level)
                .finish();

            tracing::subscriber::set_global_default(subscriber).expect("Failed to set global subscriber");
            Some(guard)
        }
        None => {
            let subscriber = SubscriberBuilder::default()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr)
                .with_max_level(max_level)
                .finish();

            tracing::subscriber::set_global_default(subscriber).expect("Failed to set global subscriber");
            None
        }
    }
}
