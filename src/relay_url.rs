//! `RelayUrl` — a lowercased, normalized secure-WebSocket URL with
//! case-folded equality (spec.md §3).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum RelayUrlError {
    #[error("relay url must use wss:// or ws://, got {0:?}")]
    BadScheme(String),
    #[error("empty relay url")]
    Empty,
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayUrl(String);

impl RelayUrl {
    /// Normalize: lowercase the whole URL, trim a trailing slash. Relays are
    /// addressed case-insensitively; the canonical form is what callers and
    /// map keys use everywhere downstream.
    pub fn parse(raw: &str) -> Result<Self, RelayUrlError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RelayUrlError::Empty);
        }
        let lower = trimmed.to_ascii_lowercase();
        if !(lower.starts_with("wss://") || lower.starts_with("ws://")) {
            return Err(RelayUrlError::BadScheme(trimmed.to_string()));
        }
        let normalized = lower.trim_end_matches('/').to_string();
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayUrl({})", self.0)
    }
}

impl Serialize for RelayUrl {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RelayUrl {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        RelayUrl::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_folds_for_equality() {
        let a = RelayUrl::parse("wss://Relay.Example.COM/").unwrap();
        let b = RelayUrl::parse("wss://relay.example.com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_ws_scheme() {
        assert!(RelayUrl::parse("https://relay.example.com").is_err());
        assert!(RelayUrl::parse("").is_err());
    }
}
