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

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use wirekeep_types::ClientName;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wirekeep/config.toml";

const MIN_PREFIX: u8 = 8;
const MAX_PREFIX: u8 = 30;

const DEFAULT_SUBNET: Ipv4Network = match Ipv4Network::new_checked(Ipv4Addr::new(10, 66, 66, 0), 24) {
    Some(subnet) => subnet,
    None => panic!("default subnet prefix out of range"),
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interface: String,
    pub config_dir: PathBuf,
    pub registry: PathBuf,
    pub clients_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub subnet: Ipv4Network,
    pub endpoint_host: String,
    pub listen_port: u16,
    pub dns: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub persistent_keepalive: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_public_key: Option<String>,
    pub qr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_up: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_down: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "wg0".into(),
            config_dir: "/etc/wireguard".into(),
            registry: "/var/lib/wirekeep/clients.db".into(),
            clients_dir: "/var/lib/wirekeep/clients".into(),
            backup_dir: "/var/backups/wirekeep".into(),
            subnet: DEFAULT_SUBNET,
            endpoint_host: "127.0.0.1".into(),
            listen_port: 51820,
            dns: vec!["1.1.1.1".into(), "1.0.0.1".into()],
            allowed_ips: vec!["0.0.0.0/0".into(), "::/0".into()],
            persistent_keepalive: 25,
            server_public_key: None,
            qr: true,
            post_up: None,
            post_down: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to write config: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("subnet {subnet} must have a prefix between /8 and /30")]
    InvalidSubnet { subnet: Ipv4Network },
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PREFIX..=MAX_PREFIX).contains(&self.subnet.prefix()) {
            return Err(ConfigError::InvalidSubnet { subnet: self.subnet });
        }
        Ok(())
    }

    /// Normalised network, so `10.66.66.7/24` behaves as `10.66.66.0/24`.
    pub fn network(&self) -> Ipv4Network {
        Ipv4Network::new(self.subnet.network(), self.subnet.prefix()).unwrap_or(self.subnet)
    }

    /// The server's own tunnel address: the first host of the subnet.
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network().network()) + 1)
    }

    pub fn server_config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .registry
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "clients.db".into());
        name.push(".lock");
        self.registry.with_file_name(name)
    }

    pub fn artifact_path(&self, name: &ClientName) -> PathBuf {
        self.clients_dir
            .join(format!("{}-client-{}.conf", self.interface, name))
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.endpoint_host, self.listen_port)
    }
}

pub async fn load(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");

    let config = match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let config: Config = toml::from_str(&contents)?;
            info!(
                path = %path.display(),
                interface = %config.interface,
                subnet = %config.subnet,
                "loaded config"
            );
            config
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        }
        Err(e) => return Err(ConfigError::Read(e)),
    };

    config.validate()?;
    Ok(config)
}

pub async fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ConfigError::Write)?;
    }
    let contents = toml::to_string_pretty(config)?;
    tokio::fs::write(path, contents)
        .await
        .map_err(ConfigError::Write)?;
    info!(path = %path.display(), "saved config");
    Ok(())
}
