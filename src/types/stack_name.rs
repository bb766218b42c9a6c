// ABOUTME: DNS-compatible stack name validation.
// ABOUTME: Ensures stack names follow RFC 1123 label requirements.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackNameError {
    #[error("stack name cannot be empty")]
    Empty,

    #[error("stack name exceeds maximum length of 63 characters")]
    TooLong,

    #[error("stack name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("stack name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("stack name must be lowercase")]
    NotLowercase,

    #[error("invalid character in stack name: '{0}'")]
    InvalidChar(char),
}

/// A validated stack name, unique within an environment among non-removed
/// deployments. Doubles as the compose project name on the engine side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StackName(String);

impl StackName {
    pub fn new(value: &str) -> Result<Self, StackNameError> {
        if value.is_empty() {
            return Err(StackNameError::Empty);
        }

        if value.len() > 63 {
            return Err(StackNameError::TooLong);
        }

        if value.starts_with('-') {
            return Err(StackNameError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(StackNameError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(StackNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(StackNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for StackName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        StackName::new(&value).map_err(serde::de::Error::custom)
    }
}
