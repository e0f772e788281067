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

use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use qrcode::QrCode;
use qrcode::render::{svg, unicode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fsutil;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("client config {} not found", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to encode QR code: {0}")]
    Qr(#[from] qrcode::types::QrError),

    #[error("client config IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a client needs to reach the server.
#[derive(Debug, Clone)]
pub struct ClientArtifact<'a> {
    pub private_key: &'a str,
    pub address: Ipv4Addr,
    pub server_public_key: &'a str,
    pub endpoint: &'a str,
    pub dns: &'a [String],
    pub allowed_ips: &'a [String],
    pub persistent_keepalive: u16,
}

impl ClientArtifact<'_> {
    pub fn render(&self) -> String {
        let mut config = String::new();
        let _ = writeln!(config, "[Interface]");
        let _ = writeln!(config, "PrivateKey = {}", self.private_key);
        let _ = writeln!(config, "Address = {}/32", self.address);
        if !self.dns.is_empty() {
            let _ = writeln!(config, "DNS = {}", self.dns.join(", "));
        }
        let _ = writeln!(config);
        let _ = writeln!(config, "[Peer]");
        let _ = writeln!(config, "PublicKey = {}", self.server_public_key);
        let _ = writeln!(config, "Endpoint = {}", self.endpoint);
        let _ = writeln!(config, "AllowedIPs = {}", self.allowed_ips.join(", "));
        if self.persistent_keepalive > 0 {
            let _ = writeln!(config, "PersistentKeepalive = {}", self.persistent_keepalive);
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub path: PathBuf,
    pub qr_path: Option<PathBuf>,
    /// Non-fatal problems, such as a QR code that could not be written.
    pub warnings: Vec<String>,
}

pub fn qr_path(path: &Path) -> PathBuf {
    path.with_extension("svg")
}

pub fn render_svg(text: &str) -> Result<String, ArtifactError> {
    let code = QrCode::new(text.as_bytes())?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .build())
}

pub fn render_terminal(text: &str) -> Result<String, ArtifactError> {
    let code = QrCode::new(text.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

/// Write the client config (mode 0600) and, if asked, a QR code beside it.
#[tracing::instrument(skip(artifact), fields(path = %path.display()))]
pub async fn emit(
    path: &Path,
    artifact: &ClientArtifact<'_>,
    with_qr: bool,
) -> Result<Emitted, ArtifactError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let text = artifact.render();
    fsutil::write_atomic(path, text.as_bytes(), 0o600).await?;
    info!(address = %artifact.address, "wrote client config");

    let mut emitted = Emitted {
        path: path.to_path_buf(),
        qr_path: None,
        warnings: Vec::new(),
    };

    if with_qr {
        let svg_path = qr_path(path);
        let written = match render_svg(&text) {
            Ok(svg) => fsutil::write_atomic(&svg_path, svg.as_bytes(), 0o600)
                .await
                .map_err(ArtifactError::from),
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {
                debug!(qr = %svg_path.display(), "wrote QR code");
                emitted.qr_path = Some(svg_path);
            }
            Err(e) => {
                warn!(error = %e, "failed to write QR code, text config is still usable");
                emitted.warnings.push(format!("QR code not written: {e}"));
            }
        }
    }

    Ok(emitted)
}

pub async fn read(path: &Path) -> Result<String, ArtifactError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Delete the client config and its QR code. Returns whether the config
/// existed.
pub async fn remove(path: &Path) -> Result<bool, ArtifactError> {
    let existed = remove_if_exists(path).await?;
    remove_if_exists(&qr_path(path)).await?;
    Ok(existed)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>(dns: &'a [String], allowed: &'a [String], keepalive: u16) -> ClientArtifact<'a> {
        ClientArtifact {
            private_key: "Y2xpZW50LXByaXY=",
            address: Ipv4Addr::new(10, 66, 66, 2),
            server_public_key: "c2VydmVyLXB1Yg==",
            endpoint: "203.0.113.7:51820",
            dns,
            allowed_ips: allowed,
            persistent_keepalive: keepalive,
        }
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn renders_full_tunnel_config() {
        let dns = strings(&["1.1.1.1", "1.0.0.1"]);
        let allowed = strings(&["0.0.0.0/0", "::/0"]);
        assert_eq!(
            sample(&dns, &allowed, 25).render(),
            "[Interface]\n\
             PrivateKey = Y2xpZW50LXByaXY=\n\
             Address = 10.66.66.2/32\n\
             DNS = 1.1.1.1, 1.0.0.1\n\
             \n\
             [Peer]\n\
             PublicKey = c2VydmVyLXB1Yg==\n\
             Endpoint = 203.0.113.7:51820\n\
             AllowedIPs = 0.0.0.0/0, ::/0\n\
             PersistentKeepalive = 25\n"
        );
    }

    #[test]
    fn omits_empty_dns_and_zero_keepalive() {
        let allowed = strings(&["0.0.0.0/0"]);
        let config = sample(&[], &allowed, 0).render();
        assert!(!config.contains("DNS ="));
        assert!(!config.contains("PersistentKeepalive"));
    }

    #[test]
    fn render_is_deterministic() {
        let dns = strings(&["9.9.9.9"]);
        let allowed = strings(&["0.0.0.0/0"]);
        assert_eq!(sample(&dns, &allowed, 25).render(), sample(&dns, &allowed, 25).render());
    }

    #[test]
    fn qr_renderers_produce_output() {
        let text = "[Interface]\nPrivateKey = x\n";
        assert!(render_svg(text).unwrap().contains("<svg"));
        assert!(!render_terminal(text).unwrap().is_empty());
    }

    #[tokio::test]
    async fn emit_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients/wg0-client-laptop.conf");
        let dns = strings(&["1.1.1.1"]);
        let allowed = strings(&["0.0.0.0/0"]);
        let artifact = sample(&dns, &allowed, 25);

        let emitted = emit(&path, &artifact, true).await.unwrap();
        assert_eq!(emitted.path, path);
        assert_eq!(emitted.qr_path, Some(qr_path(&path)));
        assert!(emitted.warnings.is_empty());
        assert_eq!(read(&path).await.unwrap(), artifact.render());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }

        assert!(remove(&path).await.unwrap());
        assert!(!qr_path(&path).exists());
        assert!(!remove(&path).await.unwrap());
        assert!(matches!(read(&path).await, Err(ArtifactError::NotFound { .. })));
    }

    #[tokio::test]
    async fn qr_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg0-client-laptop.conf");
        // A directory where the SVG should go makes the QR write fail.
        std::fs::create_dir(qr_path(&path)).unwrap();

        let dns = strings(&[]);
        let allowed = strings(&["0.0.0.0/0"]);
        let emitted = emit(&path, &sample(&dns, &allowed, 25), true).await.unwrap();
        assert_eq!(emitted.qr_path, None);
        assert_eq!(emitted.warnings.len(), 1);
        assert!(path.exists());
    }
}
