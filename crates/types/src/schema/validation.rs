//! Validated scalar types used by the app definition.
//!
//! Both types deserialize from plain strings and reject malformed input at load
//! time so the engine never has to re-check an address before sending.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email regex should compile"));

/// Returns true when the value looks like a deliverable e-mail address.
pub fn validate_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value.trim())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid e-mail address: '{0}'")]
    InvalidEmail(String),
}

/// A syntactically valid e-mail address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if validate_email(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(AddressError::InvalidEmail(value))
        }
    }
}

impl From<EmailAddress> for String {
    fn from(address: EmailAddress) -> Self {
        address.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Recipient of an action e-mail.
///
/// `self` is the address of the system itself, `user` is the address the
/// workflow was registered with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Destination {
    System,
    User,
    Address(EmailAddress),
}

impl TryFrom<String> for Destination {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "self" => Ok(Self::System),
            "user" => Ok(Self::User),
            _ => EmailAddress::try_from(value).map(Self::Address),
        }
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        match destination {
            Destination::System => "self".to_string(),
            Destination::User => "user".to_string(),
            Destination::Address(address) => address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_addresses() {
        assert!(validate_email("jane.doe@example.com"));
        assert!(validate_email("  a+tag@sub.example.org "));
    }

    #[test]
    fn rejects_incomplete_addresses() {
        assert!(!validate_email("jane"));
        assert!(!validate_email("jane@example"));
        assert!(!validate_email("jane doe@example.com"));
        assert!(!validate_email("@example.com"));
    }

    #[test]
    fn destination_keywords_are_case_insensitive() {
        assert_eq!(Destination::try_from(" Self ".to_string()).unwrap(), Destination::System);
        assert_eq!(Destination::try_from("USER".to_string()).unwrap(), Destination::User);
    }

    #[test]
    fn destination_rejects_garbage() {
        assert!(Destination::try_from("somebody".to_string()).is_err());
    }

    #[test]
    fn destination_keeps_address() {
        let destination: Destination = serde_json::from_str("\"boss@example.com\"").unwrap();
        match destination {
            Destination::Address(address) => assert_eq!(address.as_str(), "boss@example.com"),
            other => panic!("unexpected destination {other:?}"),
        }
    }
}
