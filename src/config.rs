//! Crane configuration
//!
//! Settings come from `CRANE_*` environment variables; the CLI may
//! override individual values afterwards.

use crate::error::{CraneError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default Docker Engine port for plain TCP
pub const DEFAULT_DOCKER_PORT: u16 = 2375;

/// Default listen address of the API server
pub const DEFAULT_ADDR: &str = "0.0.0.0:5013";

/// Default timeout applied to each API request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Feature flag enabling account mode and permission labels
pub const FEATURE_ACCOUNT: &str = "account";

/// Which account backend to construct
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorKind {
    /// Seeded in-memory accounts
    #[default]
    Default,
    /// Accounts stored in the database
    Db,
}

impl std::str::FromStr for AuthenticatorKind {
    type Err = CraneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "default" => Ok(AuthenticatorKind::Default),
            "db" => Ok(AuthenticatorKind::Db),
            other => Err(CraneError::InvalidConfig(format!(
                "unknown account authenticator: {}",
                other
            ))),
        }
    }
}

/// Swarm manager endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// URL scheme used for requests (http or https)
    pub scheme: String,
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
}

impl Endpoint {
    /// Parse `host:port`, `tcp://host:port` or `tcp://host`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = |why: &str| CraneError::InvalidConfig(format!("invalid endpoint {:?}: {}", input, why));

        let (scheme, rest) = match input.split_once("://") {
            Some(("", _)) => return Err(invalid("missing scheme")),
            Some(("tcp", rest)) | Some(("http", rest)) => ("http", rest),
            Some(("https", rest)) => ("https", rest),
            Some((other, _)) => return Err(invalid(&format!("unsupported scheme {}", other))),
            None => ("http", input),
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                (host, port)
            }
            None => (rest, DEFAULT_DOCKER_PORT),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Base URL for Engine API requests
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base_url())
    }
}

/// Crane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CraneConfig {
    /// API listen address
    pub addr: String,
    /// Swarm manager endpoint
    pub swarm_manager: Endpoint,
    /// Directory holding `ca.pem` for TLS to the manager
    pub docker_cert_path: Option<PathBuf>,
    /// Database driver (only `sqlite` is supported)
    pub db_driver: String,
    /// Database DSN (a file path for sqlite)
    pub db_dsn: Option<String>,
    /// Enabled feature flags
    pub feature_flags: HashSet<String>,
    /// Account backend
    pub account_authenticator: AuthenticatorKind,
    /// Timeout for each API request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CraneConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            swarm_manager: Endpoint {
                scheme: "http".to_string(),
                host: "127.0.0.1".to_string(),
                port: DEFAULT_DOCKER_PORT,
            },
            docker_cert_path: None,
            db_driver: "sqlite".to_string(),
            db_dsn: None,
            feature_flags: HashSet::new(),
            account_authenticator: AuthenticatorKind::Default,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl CraneConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    ///
    /// Unset and empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("CRANE_ADDR") {
            config.addr = addr;
        }
        if let Some(manager) = get("CRANE_SWARM_MANAGER_IP") {
            config.swarm_manager = Endpoint::parse(&manager)?;
        }
        if let Some(path) = get("CRANE_DOCKER_CERT_PATH") {
            config.docker_cert_path = Some(PathBuf::from(path));
        }
        if let Some(driver) = get("CRANE_DB_DRIVER") {
            config.db_driver = driver.to_lowercase();
        }
        config.db_dsn = get("CRANE_DB_DSN");
        if let Some(flags) = get("CRANE_FEATURE_FLAGS") {
            config.feature_flags = parse_feature_flags(&flags);
        }
        if let Some(kind) = get("CRANE_ACCOUNT_AUTHENTICATOR") {
            config.account_authenticator = kind.parse()?;
        }
        if let Some(timeout) = get("CRANE_REQUEST_TIMEOUT") {
            config.request_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                CraneError::InvalidConfig(format!("CRANE_REQUEST_TIMEOUT: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks
    pub fn validate(&self) -> Result<()> {
        if self.db_driver != "sqlite" {
            return Err(CraneError::InvalidConfig(format!(
                "unsupported database driver: {}",
                self.db_driver
            )));
        }
        if self.account_authenticator == AuthenticatorKind::Db && self.db_dsn.is_none() {
            return Err(CraneError::InvalidConfig(
                "CRANE_DB_DSN is required by the db account authenticator".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a feature flag is enabled
    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.feature_flags.contains(feature)
    }
}

fn parse_feature_flags(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
