//! Configuration module for the lanscan engine

use crate::discovery::ScanMethod;
use crate::{Result, ScanError};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for discovery and orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Backend used when a request does not name one
    pub default_method: ScanMethod,

    /// Run SSDP/mDNS/DHCP enrichment by default
    pub deep_default: bool,

    /// Keep non-responding hosts by default
    pub include_offline_default: bool,

    /// Conservative defaults: ping only, no deep discovery
    pub safe_mode: bool,

    /// Per-host ICMP timeout in milliseconds
    pub ping_timeout_ms: u64,

    /// Concurrent ICMP probes per sweep
    pub ping_workers: usize,

    /// Concurrent subnets when scanning "all"
    pub subnet_workers: usize,

    /// Most specific prefix considered sweepable
    pub max_prefix: u8,

    /// Refuse ping sweeps larger than this many hosts
    pub max_sweep_hosts: usize,

    /// SSDP reply window in milliseconds
    pub ssdp_window_ms: u64,

    /// mDNS browse window in milliseconds
    pub mdns_window_ms: u64,

    /// Hard limit for the layer-2 scan tool, seconds
    pub arp_scan_timeout_secs: u64,

    /// Hard limit for the active discovery tool, seconds
    pub nmap_timeout_secs: u64,

    /// Hard limit for `ip` invocations, seconds
    pub ip_timeout_secs: u64,

    /// Hard limit for `iw` invocations, seconds
    pub iw_timeout_secs: u64,

    /// Hard limit for one reverse or hostname lookup, milliseconds
    pub dns_timeout_ms: u64,

    /// Line-oriented lease file (`expiry mac ip hostname clientid`)
    pub dnsmasq_leases: PathBuf,

    /// Block-oriented lease file (`lease <ip> { ... }`)
    pub dhcpd_leases: PathBuf,

    /// JSON file replacing the packaged OUI table
    pub oui_path: Option<PathBuf>,

    /// Where scan history lives
    pub data_dir: PathBuf,

    /// Enable the allowlisted task runner
    pub tasks_enabled: bool,

    /// YAML files with approved task definitions
    pub task_files: Vec<PathBuf>,

    /// Task execution limit, seconds
    pub task_timeout_secs: u64,

    /// Target container for container-mode tasks
    pub exec_container: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            default_method: ScanMethod::Auto,
            deep_default: false,
            include_offline_default: false,
            safe_mode: false,
            ping_timeout_ms: 800,
            ping_workers: 128,
            subnet_workers: 8,
            max_prefix: 30,
            max_sweep_hosts: 65_536,
            ssdp_window_ms: 2000,
            mdns_window_ms: 3000,
            arp_scan_timeout_secs: 30,
            nmap_timeout_secs: 90,
            ip_timeout_secs: 10,
            iw_timeout_secs: 5,
            dns_timeout_ms: 2000,
            dnsmasq_leases: PathBuf::from("/var/lib/misc/dnsmasq.leases"),
            dhcpd_leases: PathBuf::from("/var/lib/dhcp/dhcpd.leases"),
            oui_path: None,
            data_dir: home_dir.join(".lanscan"),
            tasks_enabled: false,
            task_files: vec![home_dir.join(".lanscan").join("tasks").join("approved.yml")],
            task_timeout_secs: 120,
            exec_container: "lanscan-tools".to_string(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ScanError::ConfigError(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        let config: ScanConfig = toml::from_str(&content)
            .map_err(|e| ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from `~/.lanscan.toml`, falling back to defaults
    pub fn load_default_config() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let lanscan_config = home_dir.join(".lanscan.toml");

        if lanscan_config.exists() {
            match Self::from_toml_file(&lanscan_config) {
                Ok(config) => {
                    info!("Loaded config from {}", lanscan_config.display());
                    return config;
                }
                Err(e) => debug!("Ignoring {}: {}", lanscan_config.display(), e),
            }
        }

        Self::default()
    }

    /// Apply `LANSCAN_*` environment overrides
    pub fn apply_env(mut self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok());
        self
    }

    /// Apply overrides from an arbitrary key lookup (environment in production)
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LANSCAN_SAFE_MODE") {
            self.safe_mode = parse_bool(&v);
        }

        let explicit_method = lookup("LANSCAN_SCAN_METHOD_DEFAULT").and_then(|v| v.parse::<ScanMethod>().ok());
        let explicit_deep = lookup("LANSCAN_DEEP_DEFAULT").map(|v| parse_bool(&v));

        if self.safe_mode {
            self.default_method = ScanMethod::Ping;
            self.deep_default = false;
        }
        if let Some(method) = explicit_method {
            self.default_method = method;
        }
        if let Some(deep) = explicit_deep {
            self.deep_default = deep;
        }
        if let Some(v) = lookup("LANSCAN_INCLUDE_OFFLINE_DEFAULT") {
            self.include_offline_default = parse_bool(&v);
        }
        if let Some(v) = lookup("LANSCAN_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(secs) = lookup("LANSCAN_TASK_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.task_timeout_secs = secs;
        }
        if let Some(v) = lookup("LANSCAN_EXEC_CONTAINER") {
            self.exec_container = v;
        }
        if let Some(v) = lookup("LANSCAN_ENABLE_TASKS") {
            self.tasks_enabled = parse_bool(&v);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ping_workers == 0 {
            return Err(ScanError::ConfigError("ping_workers must be greater than 0".to_string()));
        }
        if self.subnet_workers == 0 {
            return Err(ScanError::ConfigError("subnet_workers must be greater than 0".to_string()));
        }
        if self.ping_timeout_ms == 0 {
            return Err(ScanError::ConfigError("ping_timeout_ms must be greater than 0".to_string()));
        }
        if self.max_prefix > 32 {
            return Err(ScanError::ConfigError("max_prefix must be at most 32".to_string()));
        }
        if self.arp_scan_timeout_secs == 0
            || self.nmap_timeout_secs == 0
            || self.ip_timeout_secs == 0
            || self.dns_timeout_ms == 0
        {
            return Err(ScanError::ConfigError("tool timeouts must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn ssdp_window(&self) -> Duration {
        Duration::from_millis(self.ssdp_window_ms)
    }

    pub fn mdns_window(&self) -> Duration {
        Duration::from_millis(self.mdns_window_ms)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("scan_history.jsonl")
    }
}

/// `1/true/yes/on`, case-insensitive; anything else is false
pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
