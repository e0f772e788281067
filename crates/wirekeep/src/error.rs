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

use thiserror::Error;
use wirekeep_types::{NameError, SnapshotId, SnapshotIdError};

use crate::allocator::AllocError;
use crate::artifact::ArtifactError;
use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::keys::KeyError;
use crate::lock::LockError;
use crate::platform::PlatformError;
use crate::registry::RegistryError;
use crate::server_config::SyncError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("invalid client name: {0}")]
    InvalidName(#[from] NameError),

    #[error(transparent)]
    InvalidSnapshot(#[from] SnapshotIdError),

    #[error("server key unusable: {0}")]
    ServerKey(#[from] KeyError),

    #[error("server config has no [Interface] PrivateKey and no server_public_key is configured")]
    ServerKeyMissing,

    #[error("restore of snapshot {0} aborted: not confirmed")]
    Aborted(SnapshotId),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Caller-visible failure classes. Each maps to its own exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    PoolExhausted,
    Busy,
    Invalid,
    Aborted,
    Fatal,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Fatal => 1,
            Self::NotFound => 2,
            Self::AlreadyExists => 3,
            Self::PoolExhausted => 4,
            Self::Busy => 5,
            Self::Invalid => 6,
            Self::Aborted => 7,
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(RegistryError::NotFound(_))
            | Self::Sync(SyncError::NotFound(_))
            | Self::Artifact(ArtifactError::NotFound { .. })
            | Self::Backup(BackupError::NotFound(_)) => ErrorKind::NotFound,
            Self::Registry(RegistryError::AlreadyExists(_))
            | Self::Sync(SyncError::AlreadyExists { .. }) => ErrorKind::AlreadyExists,
            Self::Alloc(AllocError::Exhausted { .. }) => ErrorKind::PoolExhausted,
            Self::Lock(LockError::Busy { .. }) => ErrorKind::Busy,
            Self::Config(_) | Self::InvalidName(_) | Self::InvalidSnapshot(_) => ErrorKind::Invalid,
            Self::Aborted(_) => ErrorKind::Aborted,
            _ => ErrorKind::Fatal,
        }
    }
}
