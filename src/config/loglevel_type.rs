use serde::de::{self, Deserializer, Visitor};

use slog::Level;
use std::{env, fmt};

use super::ENVIRONMENT_VARIABLE;

const LEVEL_NAMES: &[&str] = &["trace", "debug", "info", "warn", "error", "critical"];

/// The level used when none is configured: debug for development, warn otherwise
pub(crate) fn default_for_environment(environment: &str) -> Level {
    match environment.to_lowercase().as_str() {
        "development" | "dev" => Level::Debug,
        _ => Level::Warning,
    }
}

pub(crate) fn parse_level(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::Trace),
        "debug" => Some(Level::Debug),
        "info" => Some(Level::Info),
        "warn" | "warning" => Some(Level::Warning),
        "error" => Some(Level::Error),
        "critical" => Some(Level::Critical),
        _ => None,
    }
}

/**
 * Deserialize the log level from the configuration.
 *
 * A value that is not a level name falls back to the default of the environment named by
 * `TWIN_ENVIRONMENT`.
 */
pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_str(LogLevelVisitor).or_else(|_| {
        let environment = env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "production".into());
        Ok(default_for_environment(&environment))
    })
}

struct LogLevelVisitor;

impl<'de> Visitor<'de> for LogLevelVisitor {
    type Value = Level;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string representing a log level")
    }

    fn visit_str<E>(self, value: &str) -> Result<Level, E>
    where
        E: de::Error,
    {
        parse_level(value).ok_or_else(|| de::Error::unknown_variant(value, LEVEL_NAMES))
    }
}
