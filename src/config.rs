//! Mail server connection configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How the transport to a mail server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// TLS from the first byte (IMAPS 993, SMTPS 465).
    Implicit,
    /// Plain connect, then upgrade with STARTTLS.
    #[serde(rename = "starttls")]
    StartTls,
    /// No transport security.
    Off,
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "tls" | "ssl" | "true" => Ok(Self::Implicit),
            "starttls" => Ok(Self::StartTls),
            "off" | "none" | "plain" | "false" => Ok(Self::Off),
            other => Err(Error::Config(format!("Unknown TLS mode '{other}'"))),
        }
    }
}

/// IMAP endpoint and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: TlsMode,
    /// Skip certificate verification (self-signed local bridges).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// SMTP endpoint and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: TlsMode,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Everything needed to reach the one configured mail account.
///
/// Built once at startup and only ever read afterwards; workers
/// borrow the half they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
}

impl ServerInfo {
    /// Load server information from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `1143`)
    /// - `IMAP_TLS` (default: `starttls`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    /// - `SMTP_HOST` (default: `IMAP_HOST`)
    /// - `SMTP_PORT` (default: `1025`)
    /// - `SMTP_USERNAME` / `SMTP_PASSWORD` (default: the IMAP ones)
    /// - `SMTP_TLS` (default: `starttls`)
    /// - `SMTP_ACCEPT_INVALID_CERTS` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` under the same conditions as
    /// [`ServerInfo::from_vars`].
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build server information from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `IMAP_USERNAME` or `IMAP_PASSWORD` is
    /// missing, or if a port, TLS mode or certificate flag does not
    /// parse.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let imap_host = var("IMAP_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let imap_username =
            var("IMAP_USERNAME").ok_or_else(|| Error::Config("IMAP_USERNAME not set".into()))?;
        let imap_password =
            var("IMAP_PASSWORD").ok_or_else(|| Error::Config("IMAP_PASSWORD not set".into()))?;

        let imap = ImapConfig {
            port: parse_port("IMAP_PORT", var("IMAP_PORT"), 1143)?,
            tls: parse_tls("IMAP_TLS", var("IMAP_TLS"))?,
            accept_invalid_certs: parse_flag(
                "IMAP_ACCEPT_INVALID_CERTS",
                var("IMAP_ACCEPT_INVALID_CERTS"),
            )?,
            host: imap_host.clone(),
            username: imap_username.clone(),
            password: imap_password.clone(),
        };

        let smtp = SmtpConfig {
            host: var("SMTP_HOST").unwrap_or(imap_host),
            port: parse_port("SMTP_PORT", var("SMTP_PORT"), 1025)?,
            username: var("SMTP_USERNAME").unwrap_or(imap_username),
            password: var("SMTP_PASSWORD").unwrap_or(imap_password),
            tls: parse_tls("SMTP_TLS", var("SMTP_TLS"))?,
            accept_invalid_certs: parse_flag(
                "SMTP_ACCEPT_INVALID_CERTS",
                var("SMTP_ACCEPT_INVALID_CERTS"),
            )?,
        };

        Ok(Self { imap, smtp })
    }

    /// Load server information from a JSON document on disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or does not
    /// hold a valid server information document.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid server info in {}: {e}", path.display())))
    }
}

fn parse_port(name: &str, value: Option<String>, default: u16) -> Result<u16> {
    value.map_or(Ok(default), |v| {
        v.parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
    })
}

fn parse_tls(name: &str, value: Option<String>) -> Result<TlsMode> {
    value.map_or(Ok(TlsMode::StartTls), |v| {
        v.parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
    })
}

fn parse_flag(name: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref().map(str::trim) {
        None | Some("" | "0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => Err(Error::Config(format!("Invalid {name}: '{other}'"))),
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}
