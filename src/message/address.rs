//! Email address syntax checks.
//!
//! Deliberately loose: `something@something.tld` with no whitespace and a
//! single `@`, which is what contact forms accept. It is not a full RFC 5321
//! Mailbox parser.

use core::fmt;
use std::sync::LazyLock;

use regex::Regex;

static MAILBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("mailbox pattern is valid")
});

/// An email address that passed the syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    local_part: String,
    domain: String,
}

impl EmailAddress {
    /// Get the local part of the email address.
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// Get the domain part of the email address.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// true if `s` would parse
    pub fn is_valid(s: &str) -> bool {
        MAILBOX.is_match(s) && !s.contains(['<', '>'])
    }
}

impl core::str::FromStr for EmailAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if !Self::is_valid(s) {
            return Err(ParseError::Invalid);
        }
        let (local_part, domain) = s.split_once('@').ok_or(ParseError::Invalid)?;
        Ok(EmailAddress {
            local_part: local_part.to_owned(),
            domain: domain.to_owned(),
        })
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

/// Errors that can occur when parsing an email address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Email address is empty")]
    Empty,
    #[error("Invalid email format")]
    Invalid,
}
