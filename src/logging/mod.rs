/**
 * Initializes the logger
 *
 * https://docs.rs/slog/latest/slog/
 *
 */
use crate::config::Settings;
use slog::{Drain, LevelFilter, Logger};
use slog_async::Async;
use slog_term::FullFormat;

/**
 * Initializes the root logger: terminal output behind an async drain, filtered at the
 * configured level. Every record carries the role of this server in the pair.
 *
 * @param cfg The configuration settings containing the log level.
 * @return A `Logger` instance configured with the specified log level.
 */
pub fn init_logger(cfg: &Settings) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();

    let drain = LevelFilter::new(drain, cfg.log_level).fuse();
    Logger::root(drain, slog::o!("role" => role_name(cfg)))
}

pub fn role_name(cfg: &Settings) -> &'static str {
    if cfg.alternate {
        "alternate"
    } else {
        "primary"
    }
}
