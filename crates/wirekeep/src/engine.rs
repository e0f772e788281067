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

use std::path::PathBuf;

use tracing::{error, info, warn};
use wirekeep_types::{ClientName, ClientRecord, SnapshotId, SnapshotInfo};

use crate::allocator::AddressPool;
use crate::artifact::{self, ClientArtifact};
use crate::backup::BackupManager;
use crate::config::Config;
use crate::error::EngineError;
use crate::keys::{self, KeyProvider, X25519Keys};
use crate::lock::EngineLock;
use crate::platform::{CurrentPlatform, Effect, Platform, PlatformError};
use crate::registry::{self, ClientStore, FileClientStore};
use crate::server_config::{InterfaceSpec, ServerConfig, ServerConfigFile, SyncError};

type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug)]
pub struct InitReport {
    pub server_config: PathBuf,
    pub server_public_key: String,
    pub registry_created: bool,
}

#[derive(Debug)]
pub struct AddReport {
    pub record: ClientRecord,
    pub artifact: PathBuf,
    pub qr: Option<PathBuf>,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct RemoveReport {
    pub record: ClientRecord,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct ShowReport {
    pub config: String,
    pub qr: String,
}

#[derive(Debug)]
pub struct RestoreReport {
    pub id: SnapshotId,
    pub client_count: usize,
    pub warnings: Vec<String>,
}

/// What the caller is asked to confirm before a restore overwrites state.
#[derive(Debug, Clone, Copy)]
pub struct RestorePrompt {
    pub id: SnapshotId,
    pub client_count: usize,
}

#[derive(Debug, Default)]
pub struct RepairReport {
    /// Registry entries whose missing peer block was re-appended.
    pub restored: Vec<ClientName>,
    /// Tags in the server config with no registry entry. Left in place.
    pub orphans: Vec<String>,
    pub warnings: Vec<String>,
}

/// Client registry, server config, client artifacts and backups, kept
/// consistent. Mutating commands hold the engine lock for their duration and
/// commit the registry before touching the server config.
pub struct Engine<S, P, K> {
    config: Config,
    store: S,
    server: ServerConfigFile,
    backups: BackupManager,
    platform: P,
    keys: K,
}

impl Engine<FileClientStore, CurrentPlatform, X25519Keys> {
    pub fn from_config(config: Config) -> Self {
        let store = FileClientStore::new(&config.registry);
        Self::new(config, store, CurrentPlatform::default(), X25519Keys)
    }
}

impl<S: ClientStore, P: Platform, K: KeyProvider> Engine<S, P, K> {
    pub fn new(config: Config, store: S, platform: P, keys: K) -> Self {
        let server = ServerConfigFile::new(config.server_config_path());
        let backups = BackupManager::new(
            &config.config_dir,
            &config.registry,
            &config.backup_dir,
            format!("{}.conf", config.interface),
        );
        Self {
            config,
            store,
            server,
            backups,
            platform,
            keys,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock(&self) -> Result<EngineLock> {
        Ok(EngineLock::acquire(&self.config.lock_path())?)
    }

    fn pool(&self) -> AddressPool {
        AddressPool::new(self.config.network())
    }

    fn server_public_key(&self, server: &ServerConfig) -> Result<String> {
        if let Some(key) = &self.config.server_public_key {
            return Ok(key.clone());
        }
        let private = server
            .interface_value("PrivateKey")
            .ok_or(EngineError::ServerKeyMissing)?;
        Ok(keys::public_key_from_private(private)?)
    }

    /// Create the server config with a fresh key pair and an empty registry.
    #[tracing::instrument(skip_all, fields(interface = %self.config.interface))]
    pub async fn init(&mut self) -> Result<InitReport> {
        let _lock = self.lock()?;

        let server_keys = self.keys.generate_keypair();
        let interface = InterfaceSpec {
            address: self.config.server_address(),
            subnet: self.config.network(),
            listen_port: self.config.listen_port,
            private_key: &server_keys.private_key,
            post_up: self.config.post_up.as_deref(),
            post_down: self.config.post_down.as_deref(),
        };
        self.server.create(&interface).await?;
        let registry_created = self.store.create_if_missing().await?;
        for dir in [&self.config.clients_dir, &self.config.backup_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(SyncError::from)?;
        }

        info!(
            server_config = %self.server.path().display(),
            address = %self.config.server_address(),
            "provisioned server config"
        );
        Ok(InitReport {
            server_config: self.server.path().to_path_buf(),
            server_public_key: server_keys.public_key,
            registry_created,
        })
    }

    #[tracing::instrument(skip_all, fields(client = %name))]
    pub async fn add_client(&mut self, name: &ClientName) -> Result<AddReport> {
        let _lock = self.lock()?;

        if self.store.exists(name).await? {
            warn!("client already exists");
            return Err(registry::RegistryError::AlreadyExists(name.clone()).into());
        }

        // Nothing below may fail before the registry commit without leaving
        // both files untouched.
        let server = self.server.load().await?;
        let server_public_key = self.server_public_key(&server)?;
        let records = self.store.list().await?;
        let address = self.pool().next_address(&registry::used_addresses(&records))?;
        let client_keys = self.keys.generate_keypair();

        let record = self
            .store
            .add(name.clone(), address, client_keys.public_key.clone())
            .await?;

        let mut warnings = Vec::new();
        if server.contains_peer(name.as_str()) {
            warn!("replacing stale peer block left by an earlier client of the same name");
            warnings.push(format!("replaced stale peer block for {name}"));
            self.server.remove_peer(name.as_str()).await?;
        }
        if let Err(e) = self
            .server
            .append_peer(name.as_str(), &record.public_key, record.address)
            .await
        {
            error!(error = %e, "registry updated but server config was not, run `wirekeep repair`");
            return Err(e.into());
        }

        let endpoint = self.config.endpoint();
        let client_artifact = ClientArtifact {
            private_key: &client_keys.private_key,
            address,
            server_public_key: &server_public_key,
            endpoint: &endpoint,
            dns: &self.config.dns,
            allowed_ips: &self.config.allowed_ips,
            persistent_keepalive: self.config.persistent_keepalive,
        };
        let emitted = artifact::emit(
            &self.config.artifact_path(name),
            &client_artifact,
            self.config.qr,
        )
        .await
        .inspect_err(|e| error!(error = %e, "client registered but its config was not written"))?;
        warnings.extend(emitted.warnings);

        note_effect("reload", self.platform.reload(&self.config.interface).await, &mut warnings);

        info!(address = %address, artifact = %emitted.path.display(), "added client");
        Ok(AddReport {
            record,
            artifact: emitted.path,
            qr: emitted.qr_path,
            warnings,
        })
    }

    #[tracing::instrument(skip_all, fields(client = %name))]
    pub async fn remove_client(&mut self, name: &ClientName) -> Result<RemoveReport> {
        let _lock = self.lock()?;

        let record = self.store.remove(name).await?;
        let mut warnings = Vec::new();

        match self.server.remove_peer(name.as_str()).await {
            Ok(()) => {}
            Err(SyncError::NotFound(_)) => {
                warn!("no peer block tagged for client, server config already consistent");
                warnings.push(format!("server config had no peer block for {name}"));
            }
            Err(e) => {
                error!(error = %e, "registry updated but server config was not, run `wirekeep repair`");
                return Err(e.into());
            }
        }

        if !artifact::remove(&self.config.artifact_path(name)).await? {
            warnings.push(format!("no client config file found for {name}"));
        }

        note_effect("reload", self.platform.reload(&self.config.interface).await, &mut warnings);

        info!(address = %record.address, "removed client");
        Ok(RemoveReport { record, warnings })
    }

    pub async fn list_clients(&self) -> Result<Vec<ClientRecord>> {
        Ok(self.store.list().await?)
    }

    pub async fn show_client(&self, name: &ClientName) -> Result<ShowReport> {
        if !self.store.exists(name).await? {
            return Err(registry::RegistryError::NotFound(name.clone()).into());
        }
        let config = artifact::read(&self.config.artifact_path(name)).await?;
        let qr = artifact::render_terminal(&config)?;
        Ok(ShowReport { config, qr })
    }

    #[tracing::instrument(skip_all)]
    pub async fn backup(&self) -> Result<SnapshotId> {
        let _lock = self.lock()?;
        Ok(self.backups.snapshot().await?)
    }

    pub async fn list_backups(&self) -> Result<Vec<SnapshotInfo>> {
        Ok(self.backups.list().await?)
    }

    /// Restore a snapshot. The archive is unpacked and checked before
    /// `confirm` is asked; declining, or any failure up to that point, leaves
    /// live state untouched.
    #[tracing::instrument(skip_all, fields(snapshot = %id))]
    pub async fn restore<F>(&mut self, id: SnapshotId, confirm: F) -> Result<RestoreReport>
    where
        F: FnOnce(&RestorePrompt) -> bool,
    {
        let _lock = self.lock()?;
        let mut warnings = Vec::new();
        if let Some(from) = self.backups.recover_interrupted_restore().await? {
            warnings.push(format!(
                "moved {} back from interrupted restore in {}",
                self.config.config_dir.display(),
                from.display()
            ));
        }

        let staged = self.backups.prepare_restore(id).await?;
        let prompt = RestorePrompt {
            id,
            client_count: staged.client_count,
        };
        if !confirm(&prompt) {
            info!("restore not confirmed");
            return Err(EngineError::Aborted(id));
        }
        self.backups.discard_stale_staging(&staged).await?;

        let interface = self.config.interface.clone();
        note_effect("stop", self.platform.stop(&interface).await, &mut warnings);
        self.backups.commit_restore(staged).await?;
        note_effect("start", self.platform.start(&interface).await, &mut warnings);

        info!(client_count = prompt.client_count, "restore complete");
        Ok(RestoreReport {
            id,
            client_count: prompt.client_count,
            warnings,
        })
    }

    /// Re-append peer blocks for registry entries the server config lacks,
    /// and report tags that have no registry entry.
    #[tracing::instrument(skip_all)]
    pub async fn repair(&mut self) -> Result<RepairReport> {
        let _lock = self.lock()?;

        let records = self.store.list().await?;
        let server = self.server.load().await?;
        let mut report = RepairReport::default();

        for record in &records {
            if server.contains_peer(record.name.as_str()) {
                continue;
            }
            warn!(client = %record.name, "registry entry has no peer block, re-appending");
            self.server
                .append_peer(record.name.as_str(), &record.public_key, record.address)
                .await?;
            report.restored.push(record.name.clone());
        }

        for tag in server.peer_names() {
            if !records.iter().any(|r| r.name.as_str() == tag) && !report.orphans.iter().any(|o| o == tag) {
                warn!(client = tag, "peer block has no registry entry");
                report.orphans.push(tag.to_string());
            }
        }

        if !report.restored.is_empty() {
            let effect = self.platform.reload(&self.config.interface).await;
            note_effect("reload", effect, &mut report.warnings);
        }

        info!(
            restored = report.restored.len(),
            orphans = report.orphans.len(),
            "repair complete"
        );
        Ok(report)
    }
}

/// Daemon calls never fail a command; their outcome becomes a warning.
fn note_effect(action: &str, result: std::result::Result<Effect, PlatformError>, warnings: &mut Vec<String>) {
    match result {
        Ok(Effect::Applied) => {}
        Ok(Effect::Degraded(reason)) => {
            warn!(action, reason = %reason, "daemon {action} degraded");
            warnings.push(format!("daemon {action} skipped: {reason}"));
        }
        Err(e) => {
            error!(action, error = %e, "daemon {action} failed");
            warnings.push(format!("daemon {action} failed: {e}"));
        }
    }
}
