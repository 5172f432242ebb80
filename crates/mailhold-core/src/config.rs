//! Server configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a runnable configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryPolicy;
use crate::{Error, Result};

const MIB: i64 = 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name announced in greetings and EHLO replies.
    pub hostname: String,
    /// Product name used in greetings and sign-offs.
    pub banner: String,
    /// Address all listeners bind to.
    pub host: String,
    /// SQLite database file.
    pub database: PathBuf,
    /// Tracing filter directive, overridden by `RUST_LOG`.
    pub log_level: Option<String>,
    /// Seconds to wait for sessions after a shutdown signal.
    pub shutdown_grace_secs: u64,
    /// SMTP listener.
    pub smtp: SmtpConfig,
    /// IMAP listener.
    pub imap: ImapConfig,
    /// POP3 listener.
    pub pop3: Pop3Config,
    /// Delivery policy.
    pub delivery: DeliveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            banner: "Mailhold".to_string(),
            host: "0.0.0.0".to_string(),
            database: Self::default_database_path(),
            log_level: None,
            shutdown_grace_secs: 10,
            smtp: SmtpConfig::default(),
            imap: ImapConfig::default(),
            pop3: Pop3Config::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

/// SMTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Whether to listen.
    pub enabled: bool,
    /// TCP port.
    pub port: u16,
    /// Largest accepted message in bytes.
    pub max_message_size: usize,
    /// Concurrent session limit.
    pub max_connections: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 25,
            max_message_size: 50 * 1024 * 1024,
            max_connections: 256,
        }
    }
}

/// IMAP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    /// Whether to listen.
    pub enabled: bool,
    /// TCP port.
    pub port: u16,
    /// Concurrent session limit.
    pub max_connections: usize,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 143,
            max_connections: 256,
        }
    }
}

/// POP3 listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pop3Config {
    /// Whether to listen.
    pub enabled: bool,
    /// TCP port.
    pub port: u16,
    /// Concurrent session limit.
    pub max_connections: usize,
}

impl Default for Pop3Config {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 110,
            max_connections: 256,
        }
    }
}

/// Delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Domains mail is accepted for.
    pub local_domains: Vec<String>,
    /// Quota for new mailboxes, in bytes.
    pub default_quota_bytes: i64,
    /// Per-address quotas, in bytes.
    pub quota_overrides: HashMap<String, i64>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            local_domains: vec!["example.com".to_string(), "test.com".to_string()],
            default_quota_bytes: 1000 * MIB,
            quota_overrides: HashMap::new(),
        }
    }
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            local_domains: config.local_domains.clone(),
            default_quota_bytes: config.default_quota_bytes,
            quota_overrides: config
                .quota_overrides
                .iter()
                .map(|(address, quota)| (address.to_ascii_lowercase(), *quota))
                .collect(),
        }
    }
}

impl Config {
    /// Default database location: `<data dir>/mailhold/mailhold.db`.
    #[must_use]
    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailhold")
            .join("mailhold.db")
    }

    /// Default config location: `<config dir>/mailhold/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailhold")
            .join("config.toml")
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Toml`] if the document is malformed.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// The delivery policy derived from `[delivery]`.
    #[must_use]
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy::from(&self.delivery)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.hostname.trim().is_empty() {
            problems.push("hostname must not be empty".to_string());
        }
        if self.delivery.local_domains.iter().all(|d| d.trim().is_empty()) {
            problems.push("delivery.local_domains must name at least one domain".to_string());
        }
        if self.delivery.default_quota_bytes <= 0 {
            problems.push("delivery.default_quota_bytes must be positive".to_string());
        }
        if self.smtp.max_message_size == 0 {
            problems.push("smtp.max_message_size must be positive".to_string());
        }
        for (name, enabled, port, max_connections) in [
            ("smtp", self.smtp.enabled, self.smtp.port, self.smtp.max_connections),
            ("imap", self.imap.enabled, self.imap.port, self.imap.max_connections),
            ("pop3", self.pop3.enabled, self.pop3.port, self.pop3.max_connections),
        ] {
            if enabled && port == 0 {
                problems.push(format!("{name}.port must be set when {name} is enabled"));
            }
            if enabled && max_connections == 0 {
                problems.push(format!("{name}.max_connections must be positive"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.imap.port, 143);
        assert_eq!(config.pop3.port, 110);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.smtp.max_message_size, 52_428_800);
        assert_eq!(config.delivery.default_quota_bytes, 1_048_576_000);
        assert_eq!(config.shutdown_grace_secs, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_toml(
            r#"
            hostname = "mx.example.org"

            [imap]
            enabled = false

            [pop3]
            max_connections = 8

            [smtp]
            port = 2525

            [delivery]
            local_domains = ["example.org"]

            [delivery.quota_overrides]
            "Boss@Example.org" = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.hostname, "mx.example.org");
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.max_connections, 256);
        assert!(!config.imap.enabled);
        assert_eq!(config.imap.port, 143);
        assert_eq!(config.pop3.port, 110);
        assert_eq!(config.pop3.max_connections, 8);

        let policy = config.delivery_policy();
        assert!(policy.accepts_domain("example.org"));
        assert!(!policy.accepts_domain("example.com"));
        assert_eq!(policy.quota_for("boss@example.org"), 10);
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = Config::default();
        config.delivery.local_domains.clear();
        config.delivery.default_quota_bytes = 0;
        config.pop3.port = 0;

        let Err(Error::Config(message)) = config.validate() else {
            panic!("expected a config error");
        };
        assert!(message.contains("local_domains"));
        assert!(message.contains("default_quota_bytes"));
        assert!(message.contains("pop3.port"));
    }

    #[test]
    fn test_disabled_listener_may_have_no_port() {
        let mut config = Config::default();
        config.imap.enabled = false;
        config.imap.port = 0;
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(Config::from_toml("hostname = ["), Err(Error::Toml(_))));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }
}
