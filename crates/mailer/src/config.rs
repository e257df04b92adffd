use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Connection profile for the outbound mail channel.
///
/// Every field has a default so the application starts even when the mail
/// section is absent or incomplete; an incomplete profile is reported as
/// unusable by [`MailConfig::is_usable`], never as a startup error.
#[derive(Clone, Debug, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_true")]
    pub starttls: bool,
    #[serde(default)]
    pub implicit_tls: bool,
    #[serde(default = "default_true")]
    pub use_credentials: bool,
    #[serde(default = "default_true")]
    pub validate_certs: bool,
    /// Per-attempt timeout for each delivery tier, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            from_name: default_from_name(),
            starttls: true,
            implicit_tls: false,
            use_credentials: true,
            validate_certs: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl MailConfig {
    /// Whether the channel's configuration-level prerequisites are present.
    ///
    /// Pure function of the profile; performs no network probing. An unusable
    /// channel routes every notification to the audit log instead.
    pub fn is_usable(&self) -> bool {
        self.enabled
            && self.port != 0
            && !self.server.trim().is_empty()
            && !self.from.trim().is_empty()
            && (!self.use_credentials
                || (!self.username.trim().is_empty() && !self.password.trim().is_empty()))
    }

    /// The per-tier attempt timeout. Clamped to at least one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Summary for diagnostics and support logging. The password is never
    /// included and the username is reduced to a short prefix.
    pub fn redacted(&self) -> RedactedMailConfig {
        RedactedMailConfig {
            enabled: self.enabled,
            usable: self.is_usable(),
            server: self.server.clone(),
            port: self.port,
            username: redact(&self.username, 3),
            from: self.from.clone(),
            starttls: self.starttls,
            implicit_tls: self.implicit_tls,
            validate_certs: self.validate_certs,
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Redacted view of [`MailConfig`] safe to log or return from an
/// operational endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct RedactedMailConfig {
    pub enabled: bool,
    pub usable: bool,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub from: String,
    pub starttls: bool,
    pub implicit_tls: bool,
    pub validate_certs: bool,
    pub timeout_secs: u64,
}

/// Mask a sensitive value, revealing at most `keep` leading characters.
///
/// Values too short to mask meaningfully collapse to a fixed placeholder so
/// the original length is not recoverable either.
pub fn redact(value: &str, keep: usize) -> String {
    if value.is_empty() {
        return "unset".to_string();
    }
    if value.chars().count() <= keep + 1 {
        return "****".to_string();
    }
    let prefix: String = value.chars().take(keep).collect();
    format!("{prefix}***")
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Base URL of the frontend, used to build login links in confirmation
    /// notifications.
    pub frontend_url: String,
    #[serde(default)]
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn login_url(&self) -> String {
        format!("{}/login", self.frontend_url.trim_end_matches('/'))
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Account Services".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables matching the key path separated by double
/// underscores (e.g. `MAIL__PORT`) override the file value.
///
/// Structural problems (missing file, malformed YAML) are returned as
/// `ConfigError`; an incomplete mail section is not an error and instead
/// yields an unusable channel.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;

    if app.frontend_url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "frontend_url must not be empty".into(),
        ));
    }

    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
