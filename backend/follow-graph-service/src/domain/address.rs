use crate::error::{FollowGraphError, FollowGraphResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest account identifier accepted
pub const MAX_ADDRESS_LEN: usize = 128;

/// Stable account identifier (public key derived address).
///
/// Addresses are compared byte for byte; no case folding happens here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: impl Into<String>) -> FollowGraphResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(FollowGraphError::InvalidAddress(
                "address is empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_ADDRESS_LEN {
            return Err(FollowGraphError::InvalidAddress(format!(
                "address longer than {} characters",
                MAX_ADDRESS_LEN
            )));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(FollowGraphError::InvalidAddress(format!(
                "unexpected character {:?}",
                bad
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = FollowGraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_address() {
        let address = Address::parse("  SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7 ").unwrap();
        assert_eq!(address.as_str(), "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7");
    }

    #[test]
    fn test_parse_rejects_empty_and_oversized() {
        assert!(matches!(
            Address::parse("   "),
            Err(FollowGraphError::InvalidAddress(_))
        ));
        assert!(matches!(
            Address::parse("a".repeat(MAX_ADDRESS_LEN + 1)),
            Err(FollowGraphError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_parse_rejects_separators() {
        assert!(Address::parse("SP1:SP2").is_err());
        assert!(Address::parse("SP1 SP2").is_err());
        assert!(Address::parse("contract.name-v2_1").is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Address = serde_json::from_str("\"SP123\"").unwrap();
        assert_eq!(ok.as_str(), "SP123");
        assert!(serde_json::from_str::<Address>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"SP123\"");
    }
}
