// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Backup snapshot identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// Identifier of a backup snapshot: `YYYYmmdd-HHMMSS`, optionally followed by
/// `-N` when more than one snapshot was taken within the same second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId {
    taken_at: NaiveDateTime,
    seq: u32,
}

/// A snapshot identifier that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid snapshot id {0:?} (expected YYYYmmdd-HHMMSS[-N])")]
pub struct SnapshotIdError(
    /// The rejected input.
    pub String,
);

impl SnapshotId {
    /// Identifier for a snapshot taken at `at`.
    pub fn at(at: DateTime<Utc>) -> Self {
        let taken_at = at.naive_utc();
        // Second precision, so the id round-trips through its string form.
        let taken_at = taken_at.with_nanosecond(0).unwrap_or(taken_at);
        Self { taken_at, seq: 0 }
    }

    /// The next identifier within the same second.
    pub fn next_in_second(self) -> Self {
        Self {
            taken_at: self.taken_at,
            seq: self.seq + 1,
        }
    }

    /// When the snapshot was taken.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at.and_utc()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.taken_at.format(TIMESTAMP_FORMAT))?;
        if self.seq > 0 {
            write!(f, "-{}", self.seq)?;
        }
        Ok(())
    }
}

impl FromStr for SnapshotId {
    type Err = SnapshotIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SnapshotIdError(s.to_string());
        if s.len() < TIMESTAMP_LEN || !s.is_char_boundary(TIMESTAMP_LEN) {
            return Err(err());
        }
        let (stamp, rest) = s.split_at(TIMESTAMP_LEN);
        let taken_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|_| err())?;
        let seq = match rest.strip_prefix('-') {
            None if rest.is_empty() => 0,
            Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
                n.parse().map_err(|_| err())?
            }
            _ => return Err(err()),
        };
        Ok(Self { taken_at, seq })
    }
}

impl Serialize for SnapshotId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SnapshotId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A snapshot present in the backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot identifier.
    pub id: SnapshotId,
    /// Size of the compressed configuration archive in bytes.
    pub archive_bytes: u64,
}
