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

use ipnetwork::Ipv4Network;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fsutil;

/// Comment line that identifies the peer block following it.
pub const TAG_PREFIX: &str = "# Client: ";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("server config {} does not exist", .path.display())]
    Missing { path: PathBuf },

    #[error("server config {} already exists", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("no peer tagged for client {0} in server config")]
    NotFound(String),

    #[error("server config IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PeerBlock {
    name: String,
    text: String,
    terminated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Verbatim(String),
    Peer(PeerBlock),
}

/// In-memory view of a server config: verbatim text (the interface block and
/// anything not tagged) interleaved with tagged peer blocks.
///
/// A tagged block runs from its `# Client: <name>` line through the first
/// blank line. A block missing that terminator ends just before the next tag,
/// or at end of file. `render` reproduces the parsed text exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    segments: Vec<Segment>,
}

fn tag_name(line: &str) -> Option<&str> {
    line.trim_end_matches(['\n', '\r'])
        .strip_prefix(TAG_PREFIX)
        .map(str::trim)
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

impl ServerConfig {
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut verbatim = String::new();
        let mut peer: Option<PeerBlock> = None;

        for line in text.split_inclusive('\n') {
            if let Some(name) = tag_name(line) {
                if let Some(open) = peer.take() {
                    segments.push(Segment::Peer(open));
                } else if !verbatim.is_empty() {
                    segments.push(Segment::Verbatim(std::mem::take(&mut verbatim)));
                }
                peer = Some(PeerBlock {
                    name: name.to_string(),
                    text: line.to_string(),
                    terminated: false,
                });
                continue;
            }

            match peer.as_mut() {
                Some(block) => {
                    block.text.push_str(line);
                    if is_blank(line) {
                        block.terminated = true;
                        segments.extend(peer.take().map(Segment::Peer));
                    }
                }
                None => verbatim.push_str(line),
            }
        }

        if let Some(open) = peer {
            segments.push(Segment::Peer(open));
        } else if !verbatim.is_empty() {
            segments.push(Segment::Verbatim(verbatim));
        }

        Self { segments }
    }

    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Verbatim(text) => text.as_str(),
                Segment::Peer(block) => block.text.as_str(),
            })
            .collect()
    }

    fn peers(&self) -> impl Iterator<Item = &PeerBlock> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Peer(block) => Some(block),
            Segment::Verbatim(_) => None,
        })
    }

    /// Tagged client names in file order.
    pub fn peer_names(&self) -> Vec<&str> {
        self.peers().map(|p| p.name.as_str()).collect()
    }

    pub fn contains_peer(&self, name: &str) -> bool {
        self.peers().any(|p| p.name == name)
    }

    /// Names whose block runs into the next tag or end of file.
    pub fn unterminated_peers(&self) -> Vec<&str> {
        self.peers()
            .filter(|p| !p.terminated)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Drop every block tagged `name`. Returns how many were removed.
    pub fn remove_peer(&mut self, name: &str) -> usize {
        let before = self.segments.len();
        self.segments
            .retain(|s| !matches!(s, Segment::Peer(block) if block.name == name));
        before - self.segments.len()
    }

    /// Look up `key` in the `[Interface]` section. Keys match
    /// case-insensitively, as wg-quick reads them.
    pub fn interface_value(&self, key: &str) -> Option<&str> {
        let mut in_interface = false;
        for segment in &self.segments {
            let Segment::Verbatim(text) = segment else {
                in_interface = false;
                continue;
            };
            for line in text.lines() {
                let line = line.trim();
                if line.starts_with('[') {
                    in_interface = line.eq_ignore_ascii_case("[Interface]");
                    continue;
                }
                if !in_interface {
                    continue;
                }
                if let Some((k, v)) = line.split_once('=')
                    && k.trim().eq_ignore_ascii_case(key)
                {
                    return Some(v.trim());
                }
            }
        }
        None
    }

    /// The block appended for a client.
    pub fn render_peer(name: &str, public_key: &str, address: Ipv4Addr) -> String {
        format!("{TAG_PREFIX}{name}\n[Peer]\nPublicKey = {public_key}\nAllowedIPs = {address}/32\n\n")
    }
}

/// Settings written into the `[Interface]` block at provisioning time.
#[derive(Debug, Clone)]
pub struct InterfaceSpec<'a> {
    pub address: Ipv4Addr,
    pub subnet: Ipv4Network,
    pub listen_port: u16,
    pub private_key: &'a str,
    pub post_up: Option<&'a str>,
    pub post_down: Option<&'a str>,
}

impl InterfaceSpec<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[Interface]");
        let _ = writeln!(out, "Address = {}/{}", self.address, self.subnet.prefix());
        let _ = writeln!(out, "ListenPort = {}", self.listen_port);
        let _ = writeln!(out, "PrivateKey = {}", self.private_key);
        if let Some(post_up) = self.post_up {
            let _ = writeln!(out, "PostUp = {post_up}");
        }
        if let Some(post_down) = self.post_down {
            let _ = writeln!(out, "PostDown = {post_down}");
        }
        out.push('\n');
        out
    }
}

/// The server config on disk.
#[derive(Debug, Clone)]
pub struct ServerConfigFile {
    path: PathBuf,
}

impl ServerConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<ServerConfig, SyncError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(ServerConfig::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SyncError::Missing {
                path: self.path.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a fresh config holding only the interface block.
    pub async fn create(&self, interface: &InterfaceSpec<'_>) -> Result<(), SyncError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Err(SyncError::AlreadyExists {
                path: self.path.clone(),
            });
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        fsutil::write_atomic(&self.path, interface.render().as_bytes(), 0o600).await?;
        info!(path = %self.path.display(), "wrote server interface block");
        Ok(())
    }

    /// Append a tagged peer block at end of file. Existing bytes are left
    /// untouched; a single newline is added first if the file lacks one.
    #[tracing::instrument(skip_all, fields(client = name, address = %address))]
    pub async fn append_peer(
        &self,
        name: &str,
        public_key: &str,
        address: Ipv4Addr,
    ) -> Result<(), SyncError> {
        let last = match tokio::fs::try_exists(&self.path).await? {
            true => fsutil::last_byte(&self.path).await?,
            false => {
                return Err(SyncError::Missing {
                    path: self.path.clone(),
                });
            }
        };

        let mut block = String::new();
        if last.is_some_and(|b| b != b'\n') {
            block.push('\n');
        }
        block.push_str(&ServerConfig::render_peer(name, public_key, address));
        fsutil::append_synced(&self.path, block.as_bytes()).await?;

        debug!("appended peer block");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(client = name))]
    pub async fn remove_peer(&self, name: &str) -> Result<(), SyncError> {
        let mut config = self.load().await?;
        if config.unterminated_peers().contains(&name) {
            warn!("peer block has no blank-line terminator, removing through next tag or end of file");
        }
        match config.remove_peer(name) {
            0 => return Err(SyncError::NotFound(name.to_string())),
            1 => {}
            n => warn!(count = n, "removed duplicate peer blocks"),
        }
        fsutil::write_atomic(&self.path, config.render().as_bytes(), 0o600).await?;
        debug!("removed peer block");
        Ok(())
    }
}
