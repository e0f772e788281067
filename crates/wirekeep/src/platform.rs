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

use std::future::Future;
use std::process::Stdio;

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("invalid interface name {0:?}")]
    InvalidInterface(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a best-effort daemon operation that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Applied,
    Degraded(String),
}

impl Effect {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Capabilities for driving the VPN daemon. `Err` is fatal for the call;
/// `Effect::Degraded` means the environment could not honour it (no daemon,
/// sandbox, missing tools). Configuration correctness never depends on either.
pub trait Platform {
    /// Make the running daemon re-read its config without dropping the interface.
    fn reload(&self, interface: &str) -> impl Future<Output = Result<Effect, PlatformError>> + Send;
    fn stop(&self, interface: &str) -> impl Future<Output = Result<Effect, PlatformError>> + Send;
    fn start(&self, interface: &str) -> impl Future<Output = Result<Effect, PlatformError>> + Send;
}

#[cfg(target_os = "linux")]
pub type CurrentPlatform = SystemdPlatform;

#[cfg(not(target_os = "linux"))]
pub type CurrentPlatform = StubPlatform;

fn check_interface(name: &str) -> Result<(), PlatformError> {
    let valid = !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PlatformError::InvalidInterface(name.to_string()))
    }
}

// -- Stub platform for non-Linux --

#[derive(Debug, Default, Clone, Copy)]
pub struct StubPlatform;

impl Platform for StubPlatform {
    async fn reload(&self, _interface: &str) -> Result<Effect, PlatformError> {
        Ok(Effect::Degraded("unsupported platform".into()))
    }

    async fn stop(&self, _interface: &str) -> Result<Effect, PlatformError> {
        Ok(Effect::Degraded("unsupported platform".into()))
    }

    async fn start(&self, _interface: &str) -> Result<Effect, PlatformError> {
        Ok(Effect::Degraded("unsupported platform".into()))
    }
}

// -- wg-quick under systemd --

/// Drives `wg-quick@<iface>` through systemctl and live-reloads with
/// `wg syncconf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdPlatform;

/// Run a command to completion; a missing binary or a non-zero exit degrades.
async fn run(program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<(Effect, Vec<u8>), PlatformError> {
    use tokio::io::AsyncWriteExt;

    debug!(program, ?args, "running command");
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(program, "command not found");
            return Ok((Effect::Degraded(format!("{program} not found")), Vec::new()));
        }
        Err(e) => return Err(e.into()),
    };

    // Stdin is written concurrently with draining stdout and stderr.
    let pipe = child.stdin.take();
    let feed = async move {
        if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
            pipe.write_all(input).await?;
        }
        Ok::<(), std::io::Error>(())
    };
    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    let output = output?;
    match fed {
        // The exit status says whether that mattered.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!(program, "command exited before reading all of stdin");
        }
        other => other?,
    }
    if output.status.success() {
        return Ok((Effect::Applied, output.stdout));
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    warn!(program, status = %output.status, stderr = %stderr, "command failed");
    let reason = if stderr.is_empty() {
        format!("{program} exited with {}", output.status)
    } else {
        format!("{program}: {stderr}")
    };
    Ok((Effect::Degraded(reason), output.stdout))
}

impl Platform for SystemdPlatform {
    async fn reload(&self, interface: &str) -> Result<Effect, PlatformError> {
        check_interface(interface)?;

        let (stripped, config) = run("wg-quick", &["strip", interface], None).await?;
        if !stripped.is_applied() {
            return Ok(stripped);
        }
        let (effect, _) = run("wg", &["syncconf", interface, "/dev/stdin"], Some(&config)).await?;
        if effect.is_applied() {
            info!(interface, "reloaded wireguard config");
        }
        Ok(effect)
    }

    async fn stop(&self, interface: &str) -> Result<Effect, PlatformError> {
        check_interface(interface)?;
        let unit = format!("wg-quick@{interface}");
        let (effect, _) = run("systemctl", &["stop", &unit], None).await?;
        if effect.is_applied() {
            info!(unit = %unit, "stopped service");
        }
        Ok(effect)
    }

    async fn start(&self, interface: &str) -> Result<Effect, PlatformError> {
        check_interface(interface)?;
        let unit = format!("wg-quick@{interface}");
        let (effect, _) = run("systemctl", &["start", &unit], None).await?;
        if effect.is_applied() {
            info!(unit = %unit, "started service");
        }
        Ok(effect)
    }
}
