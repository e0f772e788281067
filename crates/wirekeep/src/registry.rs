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

use std::collections::HashSet;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use wirekeep_types::{ClientName, ClientRecord, RecordError};

use crate::fsutil;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("client {0} not found")]
    NotFound(ClientName),

    #[error("client {0} already exists")]
    AlreadyExists(ClientName),

    #[error("address {address} is already assigned to client {owner}")]
    AddressInUse { address: Ipv4Addr, owner: ClientName },

    #[error("registry {} does not exist (run `wirekeep init` first)", .path.display())]
    Missing { path: PathBuf },

    #[error("registry {} line {line}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: RecordError,
    },

    #[error("registry {} line {line}: duplicate client {name}", .path.display())]
    Duplicate {
        path: PathBuf,
        line: usize,
        name: ClientName,
    },

    #[error("registry IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent client registry. Every mutation is durable when the returned
/// future resolves.
pub trait ClientStore {
    /// Create empty backing storage if none exists. Returns whether it did.
    fn create_if_missing(&mut self) -> impl Future<Output = Result<bool, RegistryError>> + Send;

    fn add(
        &mut self,
        name: ClientName,
        address: Ipv4Addr,
        public_key: String,
    ) -> impl Future<Output = Result<ClientRecord, RegistryError>> + Send;

    fn remove(
        &mut self,
        name: &ClientName,
    ) -> impl Future<Output = Result<ClientRecord, RegistryError>> + Send;

    /// Records in insertion order.
    fn list(&self) -> impl Future<Output = Result<Vec<ClientRecord>, RegistryError>> + Send;

    fn exists(
        &self,
        name: &ClientName,
    ) -> impl Future<Output = Result<bool, RegistryError>> + Send;
}

pub fn used_addresses(records: &[ClientRecord]) -> HashSet<Ipv4Addr> {
    records.iter().map(|r| r.address).collect()
}

/// One `name:address:publicKey:timestamp` line per client.
#[derive(Debug, Clone)]
pub struct FileClientStore {
    path: PathBuf,
}

impl FileClientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<ClientRecord>, RegistryError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::Missing {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        parse(&self.path, &contents)
    }

    async fn write_all(&self, records: &[ClientRecord]) -> Result<(), RegistryError> {
        let contents = render(records);
        fsutil::write_atomic(&self.path, contents.as_bytes(), 0o600).await?;
        debug!(path = %self.path.display(), count = records.len(), "rewrote registry");
        Ok(())
    }
}

fn parse(path: &Path, contents: &str) -> Result<Vec<ClientRecord>, RegistryError> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = ClientRecord::from_line(line).map_err(|source| RegistryError::Malformed {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        if !seen.insert(record.name.clone()) {
            return Err(RegistryError::Duplicate {
                path: path.to_path_buf(),
                line: i + 1,
                name: record.name,
            });
        }
        records.push(record);
    }
    Ok(records)
}

fn render(records: &[ClientRecord]) -> String {
    records
        .iter()
        .map(|r| r.to_line() + "\n")
        .collect()
}

fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

impl ClientStore for FileClientStore {
    async fn create_if_missing(&mut self) -> Result<bool, RegistryError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        fsutil::write_atomic(&self.path, b"", 0o600).await?;
        info!(path = %self.path.display(), "created empty registry");
        Ok(true)
    }

    #[tracing::instrument(skip_all, fields(client = %name, address = %address))]
    async fn add(
        &mut self,
        name: ClientName,
        address: Ipv4Addr,
        public_key: String,
    ) -> Result<ClientRecord, RegistryError> {
        let records = self.read().await?;

        if records.iter().any(|r| r.name == name) {
            warn!("client already registered");
            return Err(RegistryError::AlreadyExists(name));
        }
        if let Some(owner) = records.iter().find(|r| r.address == address) {
            return Err(RegistryError::AddressInUse {
                address,
                owner: owner.name.clone(),
            });
        }

        let record = ClientRecord {
            name,
            address,
            public_key,
            created_at: now_seconds(),
        };

        let mut line = String::new();
        if fsutil::last_byte(&self.path).await?.is_some_and(|b| b != b'\n') {
            line.push('\n');
        }
        line.push_str(&record.to_line());
        line.push('\n');
        fsutil::append_synced(&self.path, line.as_bytes()).await?;

        info!(total = records.len() + 1, "registered client");
        Ok(record)
    }

    #[tracing::instrument(skip_all, fields(client = %name))]
    async fn remove(&mut self, name: &ClientName) -> Result<ClientRecord, RegistryError> {
        let mut records = self.read().await?;
        let Some(index) = records.iter().position(|r| &r.name == name) else {
            warn!("client not registered");
            return Err(RegistryError::NotFound(name.clone()));
        };
        let removed = records.remove(index);
        self.write_all(&records).await?;
        info!(address = %removed.address, remaining = records.len(), "unregistered client");
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<ClientRecord>, RegistryError> {
        self.read().await
    }

    async fn exists(&self, name: &ClientName) -> Result<bool, RegistryError> {
        Ok(self.read().await?.iter().any(|r| &r.name == name))
    }
}
