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

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use wirekeep_types::{ClientRecord, SnapshotId, SnapshotInfo};

use crate::fsutil;

const ARCHIVE_PREFIX: &str = "wireguard-";
const ARCHIVE_SUFFIX: &str = ".tar.gz";
const REGISTRY_PREFIX: &str = "clients-";
const REGISTRY_SUFFIX: &str = ".db";
const STAGED_DIR: &str = "config";
const PREVIOUS_DIR: &str = "previous";
const STAGING_PREFIX: &str = ".wirekeep-restore-";
/// Applied to a restored directory when the archive carries no root entry.
const FALLBACK_DIR_MODE: u32 = 0o700;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("snapshot {0} not found")]
    NotFound(SnapshotId),

    #[error("snapshot {id} is incomplete: {} is missing", .path.display())]
    Incomplete { id: SnapshotId, path: PathBuf },

    #[error("snapshot {id} is corrupt: {reason}")]
    Corrupt { id: SnapshotId, reason: String },

    #[error("registry {} does not exist, nothing to back up", .path.display())]
    RegistryMissing { path: PathBuf },

    #[error("configuration directory {} does not exist", .path.display())]
    ConfigDirMissing { path: PathBuf },

    #[error("backup IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tempfile::PersistError> for BackupError {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}

fn join_error(err: tokio::task::JoinError) -> BackupError {
    BackupError::Io(std::io::Error::other(err))
}

/// Snapshots of the configuration directory plus the registry, stored side
/// by side as `wireguard-<id>.tar.gz` and `clients-<id>.db`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    config_dir: PathBuf,
    registry: PathBuf,
    backup_dir: PathBuf,
    server_config_name: String,
}

/// A snapshot unpacked next to the live directory and checked, ready to be
/// swapped in. Dropping it discards the staging directory untouched.
#[derive(Debug)]
pub struct StagedRestore {
    pub id: SnapshotId,
    pub client_count: usize,
    staging: TempDir,
    registry: Vec<u8>,
}

impl BackupManager {
    pub fn new(
        config_dir: impl Into<PathBuf>,
        registry: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        server_config_name: impl Into<String>,
    ) -> Self {
        Self {
            config_dir: config_dir.into(),
            registry: registry.into(),
            backup_dir: backup_dir.into(),
            server_config_name: server_config_name.into(),
        }
    }

    pub fn archive_path(&self, id: SnapshotId) -> PathBuf {
        self.backup_dir
            .join(format!("{ARCHIVE_PREFIX}{id}{ARCHIVE_SUFFIX}"))
    }

    pub fn registry_copy_path(&self, id: SnapshotId) -> PathBuf {
        self.backup_dir
            .join(format!("{REGISTRY_PREFIX}{id}{REGISTRY_SUFFIX}"))
    }

    /// Archive the configuration directory and copy the registry. Live
    /// state is only read.
    #[tracing::instrument(skip(self), fields(config_dir = %self.config_dir.display()))]
    pub async fn snapshot(&self) -> Result<SnapshotId, BackupError> {
        if !tokio::fs::try_exists(&self.config_dir).await? {
            return Err(BackupError::ConfigDirMissing {
                path: self.config_dir.clone(),
            });
        }
        let registry = match tokio::fs::read(&self.registry).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::RegistryMissing {
                    path: self.registry.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        tokio::fs::create_dir_all(&self.backup_dir).await?;

        let mut id = SnapshotId::at(Utc::now());
        while tokio::fs::try_exists(self.archive_path(id)).await?
            || tokio::fs::try_exists(self.registry_copy_path(id)).await?
        {
            id = id.next_in_second();
        }

        let config_dir = self.config_dir.clone();
        let backup_dir = self.backup_dir.clone();
        let archive_path = self.archive_path(id);
        let registry_path = self.registry_copy_path(id);

        let bytes = tokio::task::spawn_blocking(move || -> Result<u64, BackupError> {
            let registry_tmp = tempfile::NamedTempFile::new_in(&backup_dir)?;
            std::fs::write(registry_tmp.path(), &registry)?;
            registry_tmp.as_file().sync_all()?;

            let archive_tmp = tempfile::NamedTempFile::new_in(&backup_dir)?;
            write_archive(&config_dir, archive_tmp.as_file())?;
            let bytes = archive_tmp.as_file().metadata()?.len();

            // The archive marks the snapshot as present, so it lands last.
            registry_tmp.persist_noclobber(&registry_path)?;
            archive_tmp.persist_noclobber(&archive_path)?;
            Ok(bytes)
        })
        .await
        .map_err(join_error)??;

        info!(snapshot = %id, archive_bytes = bytes, "created snapshot");
        Ok(id)
    }

    /// Snapshots in ascending id order.
    pub async fn list(&self) -> Result<Vec<SnapshotInfo>, BackupError> {
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(id) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix(ARCHIVE_PREFIX))
                .and_then(|n| n.strip_suffix(ARCHIVE_SUFFIX))
                .and_then(|n| n.parse::<SnapshotId>().ok())
            else {
                continue;
            };
            let archive_bytes = entry.metadata().await?.len();
            snapshots.push(SnapshotInfo { id, archive_bytes });
        }
        snapshots.sort_by_key(|s| s.id);
        Ok(snapshots)
    }

    /// Unpack and check a snapshot without touching live state.
    #[tracing::instrument(skip(self), fields(snapshot = %id))]
    pub async fn prepare_restore(&self, id: SnapshotId) -> Result<StagedRestore, BackupError> {
        let archive_path = self.archive_path(id);
        if !tokio::fs::try_exists(&archive_path).await? {
            return Err(BackupError::NotFound(id));
        }
        let registry_path = self.registry_copy_path(id);
        let registry = match tokio::fs::read(&registry_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::Incomplete {
                    id,
                    path: registry_path,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let client_count = validate_registry(id, &registry)?;

        let parent = staging_parent(&self.config_dir);
        tokio::fs::create_dir_all(&parent).await?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)?;

        let target = staging.path().join(STAGED_DIR);
        tokio::task::spawn_blocking(move || unpack_archive(&archive_path, &target))
            .await
            .map_err(join_error)?
            .map_err(|e| BackupError::Corrupt {
                id,
                reason: e.to_string(),
            })?;

        let server_config = staging.path().join(STAGED_DIR).join(&self.server_config_name);
        if !tokio::fs::try_exists(&server_config).await? {
            return Err(BackupError::Corrupt {
                id,
                reason: format!("archive has no {}", self.server_config_name),
            });
        }

        debug!(staging = %staging.path().display(), client_count, "staged snapshot");
        Ok(StagedRestore {
            id,
            client_count,
            staging,
            registry,
        })
    }

    /// Swap the staged directory in place of the live one and replace the
    /// registry. On failure the previous directory is put back, or kept on
    /// disk if it cannot be.
    #[tracing::instrument(skip_all, fields(snapshot = %staged.id))]
    pub async fn commit_restore(&self, staged: StagedRestore) -> Result<(), BackupError> {
        let StagedRestore {
            staging, registry, ..
        } = staged;
        let staged_dir = staging.path().join(STAGED_DIR);
        let previous = staging.path().join(PREVIOUS_DIR);
        let had_previous = tokio::fs::try_exists(&self.config_dir).await?;

        if had_previous {
            tokio::fs::rename(&self.config_dir, &previous).await?;
        }

        if let Err(e) = tokio::fs::rename(&staged_dir, &self.config_dir).await {
            error!(error = %e, "failed to move snapshot into place, rolling back");
            roll_back(&self.config_dir, staging, had_previous, false).await;
            return Err(e.into());
        }

        let written = match self.registry.parent() {
            Some(parent) => tokio::fs::create_dir_all(parent).await,
            None => Ok(()),
        };
        let written = match written {
            Ok(()) => fsutil::write_atomic(&self.registry, &registry, 0o600).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!(error = %e, "failed to restore registry, rolling back configuration directory");
            roll_back(&self.config_dir, staging, had_previous, true).await;
            return Err(e.into());
        }

        // `previous` lives inside the staging dir, which is removed on drop.
        drop(staging);
        info!(config_dir = %self.config_dir.display(), "restored snapshot");
        Ok(())
    }

    /// Put back a configuration directory stranded inside a staging
    /// directory by an interrupted restore. Only renames; nothing is
    /// deleted. Returns the staging directory it recovered from.
    pub async fn recover_interrupted_restore(&self) -> Result<Option<PathBuf>, BackupError> {
        if tokio::fs::try_exists(&self.config_dir).await? {
            return Ok(None);
        }
        for staging in staging_dirs(&self.config_dir).await? {
            let previous = staging.join(PREVIOUS_DIR);
            if tokio::fs::try_exists(&previous).await? {
                tokio::fs::rename(&previous, &self.config_dir).await?;
                warn!(
                    from = %previous.display(),
                    config_dir = %self.config_dir.display(),
                    "recovered configuration directory from interrupted restore"
                );
                return Ok(Some(staging));
            }
        }
        Ok(None)
    }

    /// Remove staging directories left by earlier restores, except the one
    /// held by `current`. A directory still holding a previous
    /// configuration is kept while the live directory is absent.
    pub async fn discard_stale_staging(&self, current: &StagedRestore) -> Result<(), BackupError> {
        let live_present = tokio::fs::try_exists(&self.config_dir).await?;
        for staging in staging_dirs(&self.config_dir).await? {
            if staging == current.staging.path() {
                continue;
            }
            if !live_present && tokio::fs::try_exists(staging.join(PREVIOUS_DIR)).await? {
                warn!(path = %staging.display(), "keeping staging directory that holds a previous configuration");
                continue;
            }
            warn!(path = %staging.display(), "removing stale restore staging directory");
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                warn!(path = %staging.display(), error = %e, "could not remove staging directory");
            }
        }
        Ok(())
    }
}

/// Undo a partial swap. If the previous directory cannot be moved back, the
/// staging directory is kept so it is never deleted. Returns the kept path.
async fn roll_back(
    config_dir: &Path,
    staging: TempDir,
    had_previous: bool,
    swapped: bool,
) -> Option<PathBuf> {
    let staged_dir = staging.path().join(STAGED_DIR);
    let previous = staging.path().join(PREVIOUS_DIR);

    if swapped && let Err(e) = tokio::fs::rename(config_dir, &staged_dir).await {
        let kept = staging.keep();
        error!(
            error = %e,
            previous = %kept.join(PREVIOUS_DIR).display(),
            "could not move snapshot back out, previous configuration left in place"
        );
        return Some(kept);
    }
    if had_previous && let Err(e) = tokio::fs::rename(&previous, config_dir).await {
        let kept = staging.keep();
        error!(
            error = %e,
            previous = %kept.join(PREVIOUS_DIR).display(),
            "could not restore previous configuration directory, left in place"
        );
        return Some(kept);
    }
    None
}

fn staging_parent(config_dir: &Path) -> PathBuf {
    match config_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn staging_dirs(config_dir: &Path) -> Result<Vec<PathBuf>, BackupError> {
    let mut entries = match tokio::fs::read_dir(staging_parent(config_dir)).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| n.starts_with(STAGING_PREFIX)) && entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn validate_registry(id: SnapshotId, bytes: &[u8]) -> Result<usize, BackupError> {
    let corrupt = |reason: String| BackupError::Corrupt { id, reason };
    let text = std::str::from_utf8(bytes).map_err(|e| corrupt(format!("registry copy: {e}")))?;
    let mut count = 0;
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        ClientRecord::from_line(line)
            .map_err(|e| corrupt(format!("registry copy line {}: {e}", i + 1)))?;
        count += 1;
    }
    Ok(count)
}

fn write_archive(config_dir: &Path, out: &File) -> std::io::Result<()> {
    let encoder = GzEncoder::new(out, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);
    tar.append_dir_all(".", config_dir)?;
    tar.into_inner()?.finish()?;
    out.sync_all()
}

/// Mode of the archive's root directory entry.
fn root_mode(archive: &Path) -> std::io::Result<Option<u32>> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    for entry in archive.entries()? {
        let entry = entry?;
        let is_root = entry.header().entry_type().is_dir()
            && entry
                .path()?
                .components()
                .all(|c| matches!(c, Component::CurDir));
        if is_root {
            return Ok(Some(entry.header().mode()?));
        }
    }
    Ok(None)
}

fn unpack_archive(archive: &Path, target: &Path) -> std::io::Result<()> {
    let mode = root_mode(archive)?.unwrap_or(FALLBACK_DIR_MODE);

    std::fs::create_dir_all(target)?;
    let mut unpacker = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    unpacker.set_preserve_permissions(true);
    unpacker.unpack(target)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _root: TempDir,
        manager: BackupManager,
        config_dir: PathBuf,
        registry: PathBuf,
        backup_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join("wireguard");
        let registry = root.path().join("state/clients.db");
        let backup_dir = root.path().join("backups");

        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::create_dir_all(registry.parent().unwrap()).unwrap();
        std::fs::write(config_dir.join("wg0.conf"), "[Interface]\nPrivateKey = x\n\n").unwrap();
        std::fs::write(config_dir.join("params"), "SERVER_PORT=51820\n").unwrap();
        std::fs::write(&registry, "laptop:10.66.66.2:a2V5:1700000000\n").unwrap();

        Fixture {
            manager: BackupManager::new(&config_dir, &registry, &backup_dir, "wg0.conf"),
            _root: root,
            config_dir,
            registry,
            backup_dir,
        }
    }

    #[tokio::test]
    async fn snapshot_then_restore_is_identical() {
        let f = fixture();
        let id = f.manager.snapshot().await.unwrap();
        assert!(f.manager.archive_path(id).exists());
        assert!(f.manager.registry_copy_path(id).exists());

        std::fs::write(f.config_dir.join("wg0.conf"), "changed").unwrap();
        std::fs::write(f.config_dir.join("extra"), "new file").unwrap();
        std::fs::write(&f.registry, "").unwrap();

        let staged = f.manager.prepare_restore(id).await.unwrap();
        assert_eq!(staged.client_count, 1);
        f.manager.commit_restore(staged).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(f.config_dir.join("wg0.conf")).unwrap(),
            "[Interface]\nPrivateKey = x\n\n"
        );
        assert!(!f.config_dir.join("extra").exists());
        assert_eq!(
            std::fs::read_to_string(&f.registry).unwrap(),
            "laptop:10.66.66.2:a2V5:1700000000\n"
        );

        let parent = f.config_dir.parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".wirekeep-restore-"))
            .collect();
        assert!(leftovers.is_empty(), "staging directory should be cleaned up");
    }

    #[tokio::test]
    async fn snapshots_in_same_second_do_not_collide() {
        let f = fixture();
        let a = f.manager.snapshot().await.unwrap();
        let b = f.manager.snapshot().await.unwrap();
        assert_ne!(a, b);

        let listed: Vec<_> = f.manager.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![a, b]);
    }

    #[tokio::test]
    async fn list_ignores_unrelated_files() {
        let f = fixture();
        std::fs::create_dir_all(&f.backup_dir).unwrap();
        std::fs::write(f.backup_dir.join("notes.txt"), "hi").unwrap();
        std::fs::write(f.backup_dir.join("wireguard-garbage.tar.gz"), "hi").unwrap();
        assert!(f.manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_backup_dir_lists_nothing() {
        let f = fixture();
        assert!(f.manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_snapshot_is_not_found() {
        let f = fixture();
        let id: SnapshotId = "20200101-000000".parse().unwrap();
        assert!(matches!(f.manager.prepare_restore(id).await, Err(BackupError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_archive_is_rejected_before_mutation() {
        let f = fixture();
        let id = f.manager.snapshot().await.unwrap();
        std::fs::write(f.manager.archive_path(id), b"definitely not gzip").unwrap();

        let err = f.manager.prepare_restore(id).await.unwrap_err();
        assert!(matches!(err, BackupError::Corrupt { .. }));
        assert_eq!(
            std::fs::read_to_string(f.config_dir.join("wg0.conf")).unwrap(),
            "[Interface]\nPrivateKey = x\n\n"
        );
    }

    #[tokio::test]
    async fn missing_registry_copy_is_incomplete() {
        let f = fixture();
        let id = f.manager.snapshot().await.unwrap();
        std::fs::remove_file(f.manager.registry_copy_path(id)).unwrap();
        assert!(matches!(
            f.manager.prepare_restore(id).await,
            Err(BackupError::Incomplete { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_registry_copy_is_rejected() {
        let f = fixture();
        let id = f.manager.snapshot().await.unwrap();
        std::fs::write(f.manager.registry_copy_path(id), "not a record\n").unwrap();
        assert!(matches!(
            f.manager.prepare_restore(id).await,
            Err(BackupError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn dropping_staged_restore_leaves_live_state() {
        let f = fixture();
        let id = f.manager.snapshot().await.unwrap();
        std::fs::write(f.config_dir.join("wg0.conf"), "changed").unwrap();

        let staged = f.manager.prepare_restore(id).await.unwrap();
        drop(staged);
        assert_eq!(std::fs::read_to_string(f.config_dir.join("wg0.conf")).unwrap(), "changed");
    }

    #[tokio::test]
    async fn snapshot_requires_registry() {
        let f = fixture();
        std::fs::remove_file(&f.registry).unwrap();
        assert!(matches!(
            f.manager.snapshot().await,
            Err(BackupError::RegistryMissing { .. })
        ));
    }

    fn staging_dir(f: &Fixture, name: &str) -> PathBuf {
        f.config_dir.parent().unwrap().join(format!("{STAGING_PREFIX}{name}"))
    }

    #[tokio::test]
    async fn stale_staging_is_discarded_after_prepare() {
        let f = fixture();
        let id = f.manager.snapshot().await.unwrap();
        let stale = staging_dir(&f, "abc");
        std::fs::create_dir_all(stale.join(STAGED_DIR)).unwrap();

        let staged = f.manager.prepare_restore(id).await.unwrap();
        f.manager.discard_stale_staging(&staged).await.unwrap();
        assert!(!stale.exists());
        assert!(staged.staging.path().join(STAGED_DIR).exists());

        f.manager.commit_restore(staged).await.unwrap();
        assert!(f.config_dir.join("wg0.conf").exists());
    }

    #[tokio::test]
    async fn interrupted_restore_is_recovered() {
        let f = fixture();
        let stranded = staging_dir(&f, "crash");
        std::fs::create_dir_all(&stranded).unwrap();
        std::fs::rename(&f.config_dir, stranded.join(PREVIOUS_DIR)).unwrap();

        let recovered = f.manager.recover_interrupted_restore().await.unwrap();
        assert_eq!(recovered, Some(stranded));
        assert_eq!(
            std::fs::read_to_string(f.config_dir.join("wg0.conf")).unwrap(),
            "[Interface]\nPrivateKey = x\n\n"
        );

        // Nothing left to recover once the live directory is back.
        assert_eq!(f.manager.recover_interrupted_restore().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stranded_previous_survives_discard() {
        let f = fixture();
        let id = f.manager.snapshot().await.unwrap();
        let stranded = staging_dir(&f, "crash");
        std::fs::create_dir_all(&stranded).unwrap();
        std::fs::rename(&f.config_dir, stranded.join(PREVIOUS_DIR)).unwrap();

        let staged = f.manager.prepare_restore(id).await.unwrap();
        f.manager.discard_stale_staging(&staged).await.unwrap();
        assert!(stranded.join(PREVIOUS_DIR).join("wg0.conf").exists());
    }

    #[tokio::test]
    async fn failed_roll_back_keeps_previous_on_disk() {
        let f = fixture();
        let parent = f.config_dir.parent().unwrap();
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .unwrap();
        let previous = staging.path().join(PREVIOUS_DIR);
        std::fs::create_dir_all(&previous).unwrap();
        std::fs::write(previous.join("wg0.conf"), "old live config").unwrap();

        // The live directory is occupied and not empty, so moving back fails.
        let kept = roll_back(&f.config_dir, staging, true, false).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(kept.join(PREVIOUS_DIR).join("wg0.conf")).unwrap(),
            "old live config"
        );
    }

    #[tokio::test]
    async fn roll_back_restores_previous() {
        let f = fixture();
        let parent = f.config_dir.parent().unwrap();
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .unwrap();
        let staging_path = staging.path().to_path_buf();
        std::fs::rename(&f.config_dir, staging_path.join(PREVIOUS_DIR)).unwrap();

        assert_eq!(roll_back(&f.config_dir, staging, true, false).await, None);
        assert!(f.config_dir.join("wg0.conf").exists());
        assert!(!staging_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restore_keeps_directory_mode() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        std::fs::set_permissions(&f.config_dir, std::fs::Permissions::from_mode(0o750)).unwrap();
        let id = f.manager.snapshot().await.unwrap();
        std::fs::set_permissions(&f.config_dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        let staged = f.manager.prepare_restore(id).await.unwrap();
        f.manager.commit_restore(staged).await.unwrap();

        let mode = std::fs::metadata(&f.config_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[cfg(unix)]
    #[test]
    fn archive_records_root_mode() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        std::fs::set_permissions(&f.config_dir, std::fs::Permissions::from_mode(0o700)).unwrap();
        let out = f.config_dir.parent().unwrap().join("test.tar.gz");
        write_archive(&f.config_dir, &File::create(&out).unwrap()).unwrap();
        assert_eq!(root_mode(&out).unwrap().map(|m| m & 0o777), Some(0o700));
    }
}
