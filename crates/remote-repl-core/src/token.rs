//! Bearer credential for the REPL service.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const SEPARATOR: char = '.';

/// Token error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is empty")]
    Empty,
    #[error("Invalid token format: expected `<id>.<secret>`")]
    InvalidFormat,
}

/// API token of the form `<id>.<secret>`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken {
    id: String,
    secret: String,
}

impl ApiToken {
    /// Token id (the public half).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Value for an `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {self}")
    }
}

impl FromStr for ApiToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TokenError::Empty);
        }
        let (id, secret) = s.split_once(SEPARATOR).ok_or(TokenError::InvalidFormat)?;
        if id.is_empty() || secret.is_empty() {
            return Err(TokenError::InvalidFormat);
        }
        Ok(Self {
            id: id.to_string(),
            secret: secret.to_string(),
        })
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.id, self.secret)
    }
}

// Keep the secret out of logs.
impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("id", &self.id)
            .field("secret", &"***")
            .finish()
    }
}

impl Serialize for ApiToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ApiToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let token: ApiToken = "abc.s3cret".parse().unwrap();
        assert_eq!(token.id(), "abc");
        assert_eq!(token.to_string(), "abc.s3cret");
        assert_eq!(token.bearer(), "Bearer abc.s3cret");
    }

    #[test]
    fn test_secret_may_contain_separator() {
        let token: ApiToken = "abc.def.ghi".parse().unwrap();
        assert_eq!(token.id(), "abc");
        assert_eq!(token.to_string(), "abc.def.ghi");
    }

    #[test]
    fn test_invalid_tokens() {
        assert_eq!("".parse::<ApiToken>(), Err(TokenError::Empty));
        assert_eq!("  ".parse::<ApiToken>(), Err(TokenError::Empty));
        assert_eq!("nodot".parse::<ApiToken>(), Err(TokenError::InvalidFormat));
        assert_eq!(".secret".parse::<ApiToken>(), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn test_debug_hides_secret() {
        let token: ApiToken = "abc.s3cret".parse().unwrap();
        let debug = format!("{token:?}");
        assert!(debug.contains("abc"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_serde_as_string() {
        let token: ApiToken = serde_json::from_str("\"id.secret\"").unwrap();
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"id.secret\"");
        assert!(serde_json::from_str::<ApiToken>("\"bad\"").is_err());
    }
}
