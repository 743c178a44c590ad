use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Settings for outbound page fetches.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub insecure_ssl: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            insecure_ssl: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub bot_token: Option<String>,
    pub telegram_api_base: String,
    pub fetch: FetchSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match non_blank(lookup("PORT")) {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                expected: "a port number",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        let host_raw = non_blank(lookup("BIND_ADDR")).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let host = host_raw.parse::<IpAddr>().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDR",
            expected: "an IP address",
            value: host_raw.clone(),
        })?;

        let timeout_secs = match non_blank(lookup("FETCH_TIMEOUT_SECS")) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "FETCH_TIMEOUT_SECS",
                        expected: "a positive number of seconds",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_FETCH_TIMEOUT_SECS,
        };

        let telegram_api_base = non_blank(lookup("TELEGRAM_API_BASE"))
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            bot_token: non_blank(lookup("BOT_TOKEN")),
            telegram_api_base,
            fetch: FetchSettings {
                timeout: Duration::from_secs(timeout_secs),
                insecure_ssl: lookup("OTT_THUMB_INSECURE_SSL").as_deref() == Some("1"),
            },
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
