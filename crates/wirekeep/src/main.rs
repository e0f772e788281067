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

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use wirekeep::config::{self, DEFAULT_CONFIG_PATH};
use wirekeep::engine::{Engine, RestorePrompt};
use wirekeep::error::EngineError;
use wirekeep_types::{ClientName, SnapshotId};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }

    #[cfg(not(distribute))]
    {
        fmt()
            .pretty()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }
}

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "Keeps WireGuard clients, server config and client configs in step")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate server keys and write the server config
    Init,
    /// Register a client, add its peer and write its config
    AddClient { name: String },
    /// Drop a client from the registry, the server config and disk
    RemoveClient { name: String },
    /// List registered clients
    ListClients {
        /// Print JSON instead of rows
        #[arg(long)]
        json: bool,
    },
    /// Print a client's config and its QR code
    ShowClient { name: String },
    /// Snapshot the config directory and registry
    Backup,
    /// List snapshots, oldest first
    ListBackups,
    /// Replace live state with a snapshot
    Restore {
        id: String,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Re-append missing peer blocks and report orphaned ones
    Repair,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(warnings) => {
            for warning in &warnings {
                eprintln!("warning: {warning}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.kind().exit_code())
        }
    }
}

async fn run(args: Args) -> Result<Vec<String>, EngineError> {
    debug!(config = %args.config.display(), command = ?args.command, "starting");
    let config_missing = !tokio::fs::try_exists(&args.config).await.unwrap_or(false);
    let config = config::load(&args.config).await?;
    let mut engine = Engine::from_config(config);

    let warnings = match args.command {
        Command::Init => {
            let report = engine.init().await?;
            if config_missing {
                config::save(&args.config, engine.config()).await?;
                info!(path = %args.config.display(), "wrote default configuration");
            }
            println!("server config: {}", report.server_config.display());
            println!("server public key: {}", report.server_public_key);
            Vec::new()
        }
        Command::AddClient { name } => {
            let name: ClientName = name.parse()?;
            let report = engine.add_client(&name).await?;
            println!(
                "{} -> {} ({})",
                report.record.name,
                report.record.address,
                report.artifact.display()
            );
            if let Some(qr) = &report.qr {
                println!("qr code: {}", qr.display());
            }
            report.warnings
        }
        Command::RemoveClient { name } => {
            let name: ClientName = name.parse()?;
            let report = engine.remove_client(&name).await?;
            println!("removed {} ({})", report.record.name, report.record.address);
            report.warnings
        }
        Command::ListClients { json } => {
            let records = engine.list_clients().await?;
            if json {
                let out = serde_json::to_string_pretty(&records)?;
                println!("{out}");
            } else {
                for r in &records {
                    println!(
                        "{:<15}  {:<15}  {}",
                        r.name,
                        r.address,
                        r.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
            Vec::new()
        }
        Command::ShowClient { name } => {
            let name: ClientName = name.parse()?;
            let report = engine.show_client(&name).await?;
            print!("{}", report.config);
            println!();
            println!("{}", report.qr);
            Vec::new()
        }
        Command::Backup => {
            let id = engine.backup().await?;
            println!("{id}");
            Vec::new()
        }
        Command::ListBackups => {
            for info in engine.list_backups().await? {
                println!("{}  {} bytes", info.id, info.archive_bytes);
            }
            Vec::new()
        }
        Command::Restore { id, yes } => {
            let id: SnapshotId = id.parse()?;
            let report = engine.restore(id, |prompt| yes || confirm(prompt)).await?;
            println!("restored {} ({} clients)", report.id, report.client_count);
            report.warnings
        }
        Command::Repair => {
            let report = engine.repair().await?;
            for name in &report.restored {
                println!("re-added peer block for {name}");
            }
            for orphan in &report.orphans {
                println!("peer block for {orphan} has no registry entry");
            }
            report.warnings
        }
    };

    Ok(warnings)
}

fn confirm(prompt: &RestorePrompt) -> bool {
    eprint!(
        "restore snapshot {} with {} clients, replacing the current config? [y/N] ",
        prompt.id, prompt.client_count
    );
    if std::io::stderr().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}
