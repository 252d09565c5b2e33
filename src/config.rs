//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::ratelimit::{CookieOptions, RateDeclaration};

/// Prefix for environment overrides, e.g. `TURNSTILE__RATE_LIMITING__COOKIE__SECRET`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Rate limiting configuration.
///
/// Each strategy section takes one `[count, unit]` pair or a list of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Limits keyed on client address
    #[serde(default)]
    pub ip: Option<RateDeclaration>,

    /// Limits keyed on client address and user agent
    #[serde(default)]
    pub ip_ua: Option<RateDeclaration>,

    /// Limits keyed on a signed cookie
    #[serde(default)]
    pub cookie: Option<CookieConfig>,

    /// Maximum number of counters kept in memory (unbounded if unset)
    #[serde(default)]
    pub max_keys: Option<usize>,
}

/// Signed cookie strategy configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    /// Cookie name
    #[serde(default = "default_cookie_name")]
    pub name: String,

    /// Secret used to sign cookie identities
    pub secret: String,

    /// Rates applied to the cookie identity
    pub rate: RateDeclaration,

    /// Require an explicit preflight before requests are counted
    #[serde(default)]
    pub preflight: bool,

    /// Attributes of issued cookies
    #[serde(default)]
    pub options: CookieOptions,
}

fn default_cookie_name() -> String {
    "turnstile".to_string()
}

impl fmt::Debug for CookieConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieConfig")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .field("rate", &self.rate)
            .field("preflight", &self.preflight)
            .field("options", &self.options)
            .finish()
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML file, with `TURNSTILE__` environment
    /// variables overriding file values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let config = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
