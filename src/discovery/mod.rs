//! Host discovery: subnet resolution, backend selection and probing
//!
//! Three probers share one record shape. The layer-2 scanner and the active
//! discovery scanner are external tools whose text output is parsed here; the
//! ping sweep fans out one ICMP probe per host. [`ScanEngine`] picks a prober,
//! walks the fallthrough chain and folds in enrichment.

pub mod backends;
pub mod engine;
pub mod ping;
pub mod subnet;

use crate::device::PartialRecord;
use crate::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use engine::ScanEngine;
pub use subnet::{discover_all_cidrs, discover_primary_cidr, ResolveLimits};

/// Requested discovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMethod {
    Auto,
    #[serde(alias = "arp-scan", alias = "scan_l2")]
    ScanL2,
    #[serde(alias = "nmap", alias = "scan_discovery")]
    ScanDiscovery,
    Ping,
}

impl Default for ScanMethod {
    fn default() -> Self {
        ScanMethod::Auto
    }
}

impl ScanMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMethod::Auto => "auto",
            ScanMethod::ScanL2 => "scan-l2",
            ScanMethod::ScanDiscovery => "scan-discovery",
            ScanMethod::Ping => "ping",
        }
    }

    /// Fallthrough order starting at this method
    pub fn chain(&self) -> &'static [Backend] {
        static FULL: [Backend; 3] = [Backend::Layer2, Backend::ActiveDiscovery, Backend::PingSweep];
        match self {
            ScanMethod::Auto | ScanMethod::ScanL2 => &FULL,
            ScanMethod::ScanDiscovery => &FULL[1..],
            ScanMethod::Ping => &FULL[2..],
        }
    }
}

impl FromStr for ScanMethod {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "" | "auto" => Ok(ScanMethod::Auto),
            "scan-l2" | "arp-scan" => Ok(ScanMethod::ScanL2),
            "scan-discovery" | "nmap" => Ok(ScanMethod::ScanDiscovery),
            "ping" => Ok(ScanMethod::Ping),
            other => Err(ScanError::InvalidTarget(format!("Unknown scan method: {}", other))),
        }
    }
}

impl fmt::Display for ScanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete prober
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `arp-scan`
    Layer2,
    /// `nmap -sn`
    ActiveDiscovery,
    /// Concurrent `ping`
    PingSweep,
}

impl Backend {
    /// Executable that must be on `PATH` for this backend
    pub fn program(&self) -> &'static str {
        match self {
            Backend::Layer2 => "arp-scan",
            Backend::ActiveDiscovery => "nmap",
            Backend::PingSweep => "ping",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Layer2 => "scan-l2",
            Backend::ActiveDiscovery => "scan-discovery",
            Backend::PingSweep => "ping",
        };
        f.write_str(name)
    }
}

/// Result of running one backend
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Backend ran and produced records (possibly none, for the ping sweep)
    Success(Vec<PartialRecord>),
    /// Tool is not installed
    Unavailable,
    /// Tool ran but exited non-zero, timed out or printed nothing
    Failed(String),
}

impl ProbeOutcome {
    pub fn from_error(err: ScanError) -> Self {
        match err {
            ScanError::ToolUnavailable(_) => ProbeOutcome::Unavailable,
            other => ProbeOutcome::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_aliases() {
        assert_eq!("auto".parse::<ScanMethod>().unwrap(), ScanMethod::Auto);
        assert_eq!("".parse::<ScanMethod>().unwrap(), ScanMethod::Auto);
        assert_eq!("arp-scan".parse::<ScanMethod>().unwrap(), ScanMethod::ScanL2);
        assert_eq!("scan_l2".parse::<ScanMethod>().unwrap(), ScanMethod::ScanL2);
        assert_eq!("NMAP".parse::<ScanMethod>().unwrap(), ScanMethod::ScanDiscovery);
        assert_eq!("scan-discovery".parse::<ScanMethod>().unwrap(), ScanMethod::ScanDiscovery);
        assert_eq!("ping".parse::<ScanMethod>().unwrap(), ScanMethod::Ping);
        assert!("masscan".parse::<ScanMethod>().is_err());
    }

    #[test]
    fn test_chain_always_ends_in_ping() {
        for method in [ScanMethod::Auto, ScanMethod::ScanL2, ScanMethod::ScanDiscovery, ScanMethod::Ping] {
            assert_eq!(method.chain().last(), Some(&Backend::PingSweep));
        }
        assert_eq!(ScanMethod::ScanDiscovery.chain()[0], Backend::ActiveDiscovery);
        assert_eq!(ScanMethod::Ping.chain().len(), 1);
    }

    #[test]
    fn test_outcome_from_error() {
        assert_eq!(
            ProbeOutcome::from_error(ScanError::ToolUnavailable("nmap".into())),
            ProbeOutcome::Unavailable
        );
        assert!(matches!(
            ProbeOutcome::from_error(ScanError::TimeoutError("x".into())),
            ProbeOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_method_serde_names() {
        assert_eq!(serde_json::to_string(&ScanMethod::ScanL2).unwrap(), "\"scan-l2\"");
        let m: ScanMethod = serde_json::from_str("\"nmap\"").unwrap();
        assert_eq!(m, ScanMethod::ScanDiscovery);
    }
}
