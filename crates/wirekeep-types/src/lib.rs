//! wirekeep-types: Shared data model for the wirekeep client registry.
//!
//! This crate holds the client record, its on-disk line encoding, the
//! validated client name, and the backup snapshot identifiers used by the
//! engine and the command-line front end.

#![warn(missing_docs)]

pub mod snapshot;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use snapshot::{SnapshotId, SnapshotIdError, SnapshotInfo};

/// Longest accepted client name.
pub const MAX_NAME_LEN: usize = 15;

/// Reasons a client name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// The name was empty.
    #[error("client name must not be empty")]
    Empty,
    /// The name exceeded [`MAX_NAME_LEN`].
    #[error("client name is {len} characters long (max {max})")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Allowed length.
        max: usize,
    },
    /// The name contained a character outside `[A-Za-z0-9_-]`.
    #[error("client name contains invalid character {0:?} (allowed: letters, digits, '_' and '-')")]
    InvalidChar(char),
}

/// A client identifier matching `[A-Za-z0-9_-]{1,15}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientName(String);

impl ClientName {
    /// Validate and wrap a name.
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(NameError::InvalidChar(c));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClientName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientName> for String {
    fn from(name: ClientName) -> Self {
        name.0
    }
}

/// A registered VPN client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Unique client name.
    pub name: ClientName,
    /// Tunnel address allocated from the server subnet.
    pub address: Ipv4Addr,
    /// WireGuard public key (base64).
    pub public_key: String,
    /// When the client was added. Second precision.
    pub created_at: DateTime<Utc>,
}

/// Errors decoding a registry line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The line did not have exactly four `:`-separated fields.
    #[error("expected 4 ':'-separated fields, found {0}")]
    FieldCount(usize),
    /// The name field was invalid.
    #[error("invalid name: {0}")]
    Name(#[from] NameError),
    /// The address field was not an IPv4 address.
    #[error("invalid address {0:?}")]
    Address(String),
    /// The public key field was empty.
    #[error("empty public key")]
    PublicKey,
    /// The timestamp field was not a valid epoch second count.
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
}

impl ClientRecord {
    /// Encode as a registry line, `name:address:publicKey:timestamp`, without
    /// the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.name,
            self.address,
            self.public_key,
            self.created_at.timestamp()
        )
    }

    /// Decode a registry line produced by [`ClientRecord::to_line`].
    pub fn from_line(line: &str) -> Result<Self, RecordError> {
        let fields: Vec<&str> = line.split(':').collect();
        let &[name, address, public_key, timestamp] = fields.as_slice() else {
            return Err(RecordError::FieldCount(fields.len()));
        };

        let name = ClientName::new(name)?;
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| RecordError::Address(address.to_string()))?;
        if public_key.is_empty() {
            return Err(RecordError::PublicKey);
        }
        let created_at = timestamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| RecordError::Timestamp(timestamp.to_string()))?;

        Ok(Self {
            name,
            address,
            public_key: public_key.to_string(),
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("laptop" ; "plain")]
    #[test_case("dads_phone-2" ; "underscore and dash")]
    #[test_case("ABCDEFGHIJKLMNO" ; "exactly max length")]
    fn accepts_valid_names(name: &str) {
        assert_eq!(ClientName::new(name).unwrap().as_str(), name);
    }

    #[test_case("", NameError::Empty ; "empty")]
    #[test_case("a:b", NameError::InvalidChar(':') ; "colon")]
    #[test_case("my laptop", NameError::InvalidChar(' ') ; "space")]
    #[test_case("ABCDEFGHIJKLMNOP", NameError::TooLong { len: 16, max: 15 } ; "too long")]
    fn rejects_invalid_names(name: &str, expected: NameError) {
        assert_eq!(ClientName::new(name).unwrap_err(), expected);
    }

    #[test]
    fn record_line_format() {
        let record = ClientRecord {
            name: ClientName::new("laptop").unwrap(),
            address: Ipv4Addr::new(10, 66, 66, 2),
            public_key: "cHVibGljLWtleQ==".into(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let line = record.to_line();
        assert_eq!(line, "laptop:10.66.66.2:cHVibGljLWtleQ==:1700000000");
        assert_eq!(ClientRecord::from_line(&line).unwrap(), record);
    }

    #[test_case("laptop:10.66.66.2:key", RecordError::FieldCount(3) ; "missing field")]
    #[test_case("laptop:10.66.66.2:key:1:extra", RecordError::FieldCount(5) ; "extra field")]
    #[test_case("laptop:10.66.66.300:key:1", RecordError::Address("10.66.66.300".into()) ; "bad address")]
    #[test_case("laptop:10.66.66.2::1", RecordError::PublicKey ; "empty key")]
    #[test_case("laptop:10.66.66.2:key:yesterday", RecordError::Timestamp("yesterday".into()) ; "bad timestamp")]
    fn rejects_malformed_lines(line: &str, expected: RecordError) {
        assert_eq!(ClientRecord::from_line(line).unwrap_err(), expected);
    }

    #[test]
    fn name_deserialization_validates() {
        let ok: ClientName = serde_json::from_str("\"phone\"").unwrap();
        assert_eq!(ok.as_str(), "phone");
        assert!(serde_json::from_str::<ClientName>("\"bad name\"").is_err());
    }
}
