//! Access to the host system: external tools, name resolution
//!
//! Everything the engine needs from the OS goes through [`Platform`], so a
//! scan can be exercised against scripted output in tests.

use crate::{Result, ScanError};
use async_trait::async_trait;
use log::debug;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Captured result of an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Non-zero exit or nothing on stdout
    pub fn is_unusable(&self) -> bool {
        !self.success || self.stdout.trim().is_empty()
    }
}

/// OS facilities consumed by the discovery engine
#[async_trait]
pub trait Platform: Send + Sync {
    /// Resolve an executable by name without running it
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Run a program with a hard timeout
    async fn run(&self, program: &str, args: &[String], limit: Duration) -> Result<CommandOutput>;

    /// Reverse DNS for an address, `None` on any failure
    async fn reverse_dns(&self, ip: Ipv4Addr) -> Option<String>;

    /// IPv4 address the machine's own hostname resolves to
    async fn hostname_address(&self) -> Option<Ipv4Addr>;
}

/// The real system
#[derive(Debug, Clone, Default)]
pub struct SystemPlatform;

impl SystemPlatform {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Platform for SystemPlatform {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        find_in_path(program, std::env::var_os("PATH").as_deref())
    }

    async fn run(&self, program: &str, args: &[String], limit: Duration) -> Result<CommandOutput> {
        let path = self
            .locate(program)
            .ok_or_else(|| ScanError::ToolUnavailable(program.to_string()))?;

        let mut cmd = Command::new(path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing {} with args: {:?}", program, args);

        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| ScanError::TimeoutError(format!("{} exceeded {:?}", program, limit)))?
            .map_err(|e| ScanError::ToolFailed(format!("Failed to execute {}: {}", program, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            exit_code: output.status.code(),
        })
    }

    async fn reverse_dns(&self, ip: Ipv4Addr) -> Option<String> {
        let addr = IpAddr::V4(ip);
        tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr).ok())
            .await
            .ok()
            .flatten()
            .filter(|name| !name.is_empty() && name != &ip.to_string())
    }

    async fn hostname_address(&self) -> Option<Ipv4Addr> {
        tokio::task::spawn_blocking(|| {
            let hostname = dns_lookup::get_hostname().ok()?;
            dns_lookup::lookup_host(&hostname)
                .ok()?
                .into_iter()
                .find_map(|addr| match addr {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                })
        })
        .await
        .ok()
        .flatten()
    }
}

/// Search a `PATH`-style list for an executable file
pub fn find_in_path(program: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let candidate = PathBuf::from(program);
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .flat_map(|dir| executable_candidates(&dir, program))
        .find(|candidate| is_executable(candidate))
}

fn executable_candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![dir.join(program), dir.join(format!("{}.exe", program))]
    } else {
        vec![dir.join(program)]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
