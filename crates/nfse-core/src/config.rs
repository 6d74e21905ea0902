//! Configuration resolution for the NFS-e client.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (explicit path, else ~/.config/nfse/config.toml)
//! 3. Environment variables (highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub environment: WebserviceEnvironment,
    #[serde(default)]
    pub webservice: WebserviceConfig,
    #[serde(default)]
    pub certificate: CertificateConfig,
    #[serde(default)]
    pub issuer: IssuerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which municipal deployment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WebserviceEnvironment {
    #[default]
    Homologation,
    Production,
}

impl WebserviceEnvironment {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Homologation => "homologation",
            Self::Production => "production",
        }
    }
}

impl std::str::FromStr for WebserviceEnvironment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "homologation" | "homologacao" | "homolog" => Ok(Self::Homologation),
            "production" | "producao" | "prod" => Ok(Self::Production),
            other => Err(Error::Config(format!("Unknown environment: {other}"))),
        }
    }
}

/// Webservice endpoints and protocol constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebserviceConfig {
    pub homologation_url: String,
    pub production_url: String,
    /// Base URI the `SOAPAction` header is derived from.
    pub soap_action_base: String,
    /// ABRASF layout version written into documents and the header block.
    pub layout_version: String,
}

impl Default for WebserviceConfig {
    fn default() -> Self {
        Self {
            homologation_url: String::new(),
            production_url: String::new(),
            soap_action_base: "http://nfse.abrasf.org.br".to_string(),
            layout_version: "2.04".to_string(),
        }
    }
}

/// Location of the PKCS#12 credential bundle.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    pub path: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// Warn when the certificate expires within this many days.
    pub expiry_warning_days: u32,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            path: None,
            passphrase: None,
            expiry_warning_days: 30,
        }
    }
}

impl std::fmt::Debug for CertificateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateConfig")
            .field("path", &self.path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("expiry_warning_days", &self.expiry_warning_days)
            .finish()
    }
}

/// The issuing company (prestador).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IssuerConfig {
    pub cnpj: String,
    pub municipal_registration: String,
}

/// Retry and timeout policy for webservice calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout (not per retry sequence).
    pub attempt_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            attempt_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl TransportConfig {
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "nfse=info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Endpoint URL for the active environment.
    pub fn endpoint(&self) -> &str {
        match self.environment {
            WebserviceEnvironment::Homologation => &self.webservice.homologation_url,
            WebserviceEnvironment::Production => &self.webservice.production_url,
        }
    }

    /// Reject settings that would fail on first use.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint();
        if endpoint.is_empty() {
            return Err(Error::Config(format!(
                "No webservice URL configured for the {} environment",
                self.environment.as_str()
            )));
        }
        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(Error::Config(format!("Invalid webservice URL: {endpoint}")));
        }
        if self.webservice.soap_action_base.is_empty() {
            return Err(Error::Config("soap_action_base is empty".into()));
        }
        if self.transport.max_attempts == 0 {
            return Err(Error::Config("transport.max_attempts must be at least 1".into()));
        }
        if self.transport.attempt_timeout_secs == 0 {
            return Err(Error::Config(
                "transport.attempt_timeout_secs must be positive".into(),
            ));
        }
        if self.transport.max_delay_ms < self.transport.base_delay_ms {
            return Err(Error::Config(
                "transport.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// `path` overrides the default config file location. A missing default
/// file is not an error; a missing explicit file is.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    match path {
        Some(explicit) => config = load_config_file(explicit)?,
        None => {
            if let Some(default_path) = default_config_path() {
                if default_path.exists() {
                    config = load_config_file(&default_path)?;
                }
            }
        }
    }

    apply_env_overrides(&mut config)?;

    Ok(config)
}

/// Default config file path (`<config dir>/nfse/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("nfse").join("config.toml"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(val) = std::env::var("NFSE_ENVIRONMENT") {
        config.environment = val.parse()?;
    }
    if let Ok(val) = std::env::var("NFSE_CERTIFICATE_PATH") {
        config.certificate.path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("NFSE_CERTIFICATE_PASSPHRASE") {
        config.certificate.passphrase = Some(val);
    }
    if let Ok(val) = std::env::var("NFSE_MAX_ATTEMPTS") {
        config.transport.max_attempts = parse_env("NFSE_MAX_ATTEMPTS", &val)?;
    }
    if let Ok(val) = std::env::var("NFSE_BASE_DELAY_MS") {
        config.transport.base_delay_ms = parse_env("NFSE_BASE_DELAY_MS", &val)?;
    }
    if let Ok(val) = std::env::var("NFSE_ATTEMPT_TIMEOUT_SECS") {
        config.transport.attempt_timeout_secs = parse_env("NFSE_ATTEMPT_TIMEOUT_SECS", &val)?;
    }
    if let Ok(val) = std::env::var("NFSE_LOG_FILTER") {
        config.logging.filter = val;
    }
    Ok(())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {name} value {value:?}: {e}")))
}
