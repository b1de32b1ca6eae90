/**
 * The environment the server runs in. It picks the environment config file and the
 * default log level.
 *
 * - `development` (also 'dev')
 * - `staging` (also 'stg')
 * - `production` (also 'prod'), also used for any unrecognized name
 */
use std::fmt;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(non_camel_case_types)]
pub enum EnvironmentType {
    development,
    staging,
    #[default]
    production,
}

impl EnvironmentType {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "development" | "dev" => EnvironmentType::development,
            "staging" | "stg" => EnvironmentType::staging,
            _ => EnvironmentType::production,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::development => "development",
            EnvironmentType::staging => "staging",
            EnvironmentType::production => "production",
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvironmentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(EnvironmentType::parse(&s))
    }
}
