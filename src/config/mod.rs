/**
 * Initialize server configuration, using hierarchical configuration
 * https://docs.rs/config/latest/config/
 *
 * 1. First twin.yaml is read
 * 2. Then twin.{environment}.yaml is read
 * 3. Then twin.local.yaml is read (this is normally used for dev and not checked in git)
 * 4. Finally, environment variables prefixed with TWIN_ are read
 */
use config::{Config, ConfigError, Environment, File};
use environment_type::EnvironmentType;
use serde::Deserialize;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
pub mod environment_type;
mod loglevel_type;

/// Environment variable selecting the environment, also used to infer the log level
pub(crate) const ENVIRONMENT_VARIABLE: &str = "TWIN_ENVIRONMENT";

/**
 * Represents the configuration settings for the STUN server pair.
 *
 * Fields:
 * - `environment`: The environment type (e.g., development, staging, or production).
 * - `ip`, `port`: Address the TCP and UDP servers listen on. `port` is also the primary port.
 *   RESPONSE-ORIGIN carries the bound address, so with the default `0.0.0.0` it reports
 *   `0.0.0.0:<port>`. Set `ip` to the public interface address for a usable RESPONSE-ORIGIN.
 * - `alternate`: Run as the alternate server instead of the primary.
 * - `alternate_ip`: IP address of the alternate server. Pairing is off when it is not set.
 * - `alternate_port`: The alternate port, advertised in OTHER-ADDRESS.
 * - `control_ip`, `control_port`: Control connection address. The primary listens on it and
 *   the alternate connects to it.
 * - `reconnect_delay_ms`: Delay between two connection attempts of the alternate server.
 * - `disable_tcp`: Flag to disable TCP server port.
 * - `disable_udp`: Flag to disable UDP server port.
 * - `software_name`: Added as SOFTWARE attribute to STUN responses.
 * - `integrity_key`: Shared key for MESSAGE-INTEGRITY. Requests and responses are not signed without it.
 * - `fingerprint`: Add FINGERPRINT to responses.
 * - `padding_byte`: Byte used to pad attribute values to a 4-byte boundary.
 * - `log_level`: The logging level. By default, logging is inferred from environment type if no other settings are found.
 */
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: EnvironmentType,
    pub ip: IpAddr,
    pub port: u16,
    pub alternate: bool,
    #[serde(default)]
    pub alternate_ip: Option<IpAddr>,
    pub alternate_port: u16,
    pub control_ip: IpAddr,
    pub control_port: u16,
    pub reconnect_delay_ms: u64,
    pub disable_tcp: bool,
    pub disable_udp: bool,
    pub software_name: String,
    #[serde(default)]
    pub integrity_key: Option<String>,
    pub fingerprint: bool,
    pub padding_byte: u8,
    #[serde(deserialize_with = "loglevel_type::deserialize")]
    pub log_level: slog::Level,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "production".into());

        let s = Config::builder()
            // default config file
            .add_source(File::with_name("twin.yaml").required(false))
            // environment-based config file
            .add_source(File::with_name(&format!("twin.{run_mode}.yaml")).required(false))
            // local config file (don't check this into source control)
            .add_source(File::with_name("twin.local.yaml").required(false))
            .add_source(Environment::with_prefix("TWIN"))
            .set_default("ip", "0.0.0.0")?
            .set_default("port", 3478)?
            .set_default("alternate", false)?
            .set_default("alternate_port", 3479)?
            .set_default("control_ip", "127.0.0.1")?
            .set_default("control_port", 1346)?
            .set_default("reconnect_delay_ms", 100)?
            .set_default(
                "log_level",
                loglevel_type::default_for_environment(&run_mode).as_str(),
            )?
            .set_default("environment", EnvironmentType::production.as_str())?
            .set_default("disable_tcp", false)?
            .set_default("disable_udp", false)?
            .set_default("software_name", "TWIN_STUN/0.1")?
            .set_default("fingerprint", false)?
            .set_default("padding_byte", 0x20)?
            .build()?;

        s.try_deserialize()
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn control_address(&self) -> SocketAddr {
        SocketAddr::new(self.control_ip, self.control_port)
    }

    pub fn integrity_key(&self) -> Option<&[u8]> {
        self.integrity_key.as_deref().map(str::as_bytes)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            environment: EnvironmentType::production,
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3478,
            alternate: false,
            alternate_ip: None,
            alternate_port: 3479,
            control_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            control_port: 1346,
            reconnect_delay_ms: 100,
            disable_tcp: false,
            disable_udp: false,
            software_name: "TWIN_STUN/0.1".to_string(),
            integrity_key: None,
            fingerprint: false,
            padding_byte: 0x20,
            log_level: slog::Level::Warning,
        }
    }
}
