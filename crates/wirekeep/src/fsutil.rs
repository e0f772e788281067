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

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

/// Replace `path` with `contents` via a synced temp file and a rename, so
/// readers see either the old or the new file. An existing file's
/// permissions carry over; new files get `mode`.
pub async fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let tmp = sibling_temp_path(path);
    let permissions = match tokio::fs::metadata(path).await {
        Ok(meta) => Some(meta.permissions()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    let result = async {
        let mut file = create_with_mode(&tmp, mode).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        if let Some(permissions) = permissions {
            tokio::fs::set_permissions(&tmp, permissions).await?;
        }
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Append `contents` and sync. Existing bytes are never rewritten.
pub async fn append_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

pub async fn create_with_mode(path: &Path, mode: u32) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path).await
}

/// Last byte of a file, or `None` when it is empty or absent.
pub async fn last_byte(path: &Path) -> std::io::Result<Option<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes.last().copied()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        write_atomic(&path, b"one", 0o600).await.unwrap();
        write_atomic(&path, b"two", 0o600).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp file should be renamed away");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn atomic_write_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        write_atomic(&path, b"new", 0o600).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[tokio::test]
    async fn append_preserves_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"head\n").unwrap();
        append_synced(&path, b"tail\n").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"head\ntail\n");
        assert_eq!(last_byte(&path).await.unwrap(), Some(b'\n'));
    }
}
