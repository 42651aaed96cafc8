//! SMTP relay configuration

use std::{env, time::Duration};

use crate::{
    EmailAddress, SmtpMailClient,
    session::{Credentials, DEFAULT_TIMEOUT},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Mail submission settings for the contact relay
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub credentials: Credentials,
    pub helo_domain: String,
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Load the relay configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `SMTP_USER` (also the inbox that receives submissions)
    /// - `SMTP_PASS`
    ///
    /// Optional (with defaults):
    /// - `SMTP_HOST` (default: `smtp.zoho.com`)
    /// - `SMTP_PORT` (default: `465`)
    /// - `SMTP_HELO_DOMAIN` (default: domain of `SMTP_USER`)
    /// - `SMTP_TIMEOUT_SECS` (default: `30`)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`SmtpConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("SMTP_HOST").unwrap_or_else(|| "smtp.zoho.com".to_string());
        let port = match lookup("SMTP_PORT") {
            Some(port) => port.parse().map_err(|e| ConfigError::Invalid {
                name: "SMTP_PORT",
                reason: format!("{e}"),
            })?,
            None => 465,
        };
        let username = lookup("SMTP_USER").ok_or(ConfigError::Missing("SMTP_USER"))?;
        let mailbox: EmailAddress = username.parse().map_err(|e| ConfigError::Invalid {
            name: "SMTP_USER",
            reason: format!("{e}"),
        })?;
        let password = lookup("SMTP_PASS")
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::Missing("SMTP_PASS"))?;
        let helo_domain =
            lookup("SMTP_HELO_DOMAIN").unwrap_or_else(|| mailbox.domain().to_string());
        // sent verbatim as the EHLO argument
        if helo_domain.is_empty()
            || helo_domain
                .chars()
                .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ConfigError::Invalid {
                name: "SMTP_HELO_DOMAIN",
                reason: "must be a single non-empty word".to_string(),
            });
        }
        let timeout = match lookup("SMTP_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(secs.parse().map_err(|e| ConfigError::Invalid {
                name: "SMTP_TIMEOUT_SECS",
                reason: format!("{e}"),
            })?),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            credentials: Credentials::new(host, port, username, password),
            helo_domain,
            timeout,
        })
    }

    /// The inbox submissions are delivered to, which is also the login.
    pub fn mailbox(&self) -> &str {
        &self.credentials.username
    }

    pub fn client(&self) -> SmtpMailClient {
        SmtpMailClient::new()
            .with_helo_domain(self.helo_domain.clone())
            .with_timeout(self.timeout)
    }
}
