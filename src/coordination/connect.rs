//! Connection string parsing.

use super::{StoreError, StoreResult};
use regex::Regex;
use std::sync::LazyLock;

/// Pattern for a single `host:port` endpoint.
static ENDPOINT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?:(\d{1,5})$")
        .expect("Invalid endpoint regex")
});

/// A validated, comma-separated list of `host:port` endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
    endpoints: Vec<String>,
}

impl ConnectString {
    /// Parse `localhost:2181,other:2181`.
    ///
    /// Whitespace anywhere, an empty list, an empty entry, a malformed host
    /// or a port outside `1..=65535` are rejected.
    pub fn parse(value: &str) -> StoreResult<Self> {
        let invalid = || StoreError::InvalidConnectString(value.to_string());

        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let mut endpoints = Vec::new();
        for endpoint in value.split(',') {
            let caps = ENDPOINT_REGEX.captures(endpoint).ok_or_else(invalid)?;
            let port: u32 = caps[1].parse().map_err(|_| invalid())?;
            if port == 0 || port > u32::from(u16::MAX) {
                return Err(invalid());
            }
            endpoints.push(endpoint.to_string());
        }

        Ok(Self { endpoints })
    }

    /// The endpoints in the order given.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

impl std::fmt::Display for ConnectString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoints.join(","))
    }
}

impl std::str::FromStr for ConnectString {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_multiple_endpoints() {
        let single = ConnectString::parse("localhost:2181").unwrap();
        assert_eq!(single.endpoints(), ["localhost:2181"]);

        let many = ConnectString::parse("zk-1.internal:2181,10.0.0.2:2182").unwrap();
        assert_eq!(many.endpoints().len(), 2);
        assert_eq!(many.to_string(), "zk-1.internal:2181,10.0.0.2:2182");
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in [
            "",
            "localhost",
            "localhost:",
            ":2181",
            "localhost:2181,",
            "localhost:2181, other:2181",
            "local host:2181",
            "localhost:0",
            "localhost:70000",
            "-host:2181",
        ] {
            assert!(
                matches!(
                    ConnectString::parse(bad),
                    Err(StoreError::InvalidConnectString(_))
                ),
                "expected '{bad}' to be rejected"
            );
        }
    }
}
