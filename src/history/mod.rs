//! Append-only scan history and comparison

use crate::device::DeviceRecord;
use crate::{Result, ScanError};
use chrono::{DateTime, Utc};
use colored::*;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// One completed scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: DateTime<Utc>,
    pub params: HashMap<String, String>,
    pub result: Vec<DeviceRecord>,
}

impl HistoryEntry {
    pub fn new(params: HashMap<String, String>, result: Vec<DeviceRecord>) -> Self {
        Self {
            ts: Utc::now(),
            params,
            result,
        }
    }
}

/// Devices that came and went between two scans
#[derive(Debug, Default)]
pub struct HistoryDiff {
    pub appeared: Vec<Ipv4Addr>,
    pub disappeared: Vec<Ipv4Addr>,
}

impl HistoryDiff {
    /// Compare online devices of `old` and `new`
    pub fn between(old: &HistoryEntry, new: &HistoryEntry) -> Self {
        let online = |entry: &HistoryEntry| -> Vec<Ipv4Addr> {
            entry.result.iter().filter(|d| d.is_online()).map(|d| d.ip).collect()
        };
        let before = online(old);
        let after = online(new);
        let before_set: HashSet<_> = before.iter().copied().collect();
        let after_set: HashSet<_> = after.iter().copied().collect();

        Self {
            appeared: after.into_iter().filter(|ip| !before_set.contains(ip)).collect(),
            disappeared: before.into_iter().filter(|ip| !after_set.contains(ip)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }
}

/// JSON-lines history file
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/scan_history.jsonl`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("scan_history.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, creating parent directories as needed
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ScanError::HistoryError(format!("Cannot create {}: {}", parent.display(), e)))?;
        }

        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ScanError::HistoryError(format!("Cannot open {}: {}", self.path.display(), e)))?;
        writeln!(file, "{}", line)?;

        debug!("Appended scan of {} devices to {}", entry.result.len(), self.path.display());
        Ok(())
    }

    /// Last `limit` readable entries, oldest first. A missing file is empty.
    pub fn tail(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<HistoryEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable history line: {}", e);
                    None
                }
            })
            .collect();

        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// Print recent scans
    pub fn print_list(&self, limit: usize) -> Result<()> {
        let entries = self.tail(limit)?;

        if entries.is_empty() {
            println!("{}", "No scan history found.".yellow());
            return Ok(());
        }

        println!("{}", "Scan History:".bright_cyan().bold());
        println!();

        let mut previous: Option<&HistoryEntry> = None;
        for entry in &entries {
            let online = entry.result.iter().filter(|d| d.is_online()).count();
            println!(
                "{} {}",
                "Time:".bright_white().bold(),
                entry.ts.format("%Y-%m-%d %H:%M:%S UTC").to_string().bright_yellow()
            );
            if let Some(subnet) = entry.params.get("subnet") {
                println!("  Subnet: {}", subnet.bright_cyan());
            }
            if let Some(method) = entry.params.get("method") {
                println!("  Method: {}", method);
            }
            println!(
                "  Devices: {} ({} online)",
                entry.result.len(),
                online.to_string().bright_green()
            );

            if let Some(prev) = previous {
                let diff = HistoryDiff::between(prev, entry);
                for ip in &diff.appeared {
                    println!("  {} {}", "+".bright_green(), ip);
                }
                for ip in &diff.disappeared {
                    println!("  {} {}", "-".bright_red(), ip);
                }
            }
            println!();
            previous = Some(entry);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStatus;

    fn device(ip: &str, status: DeviceStatus) -> DeviceRecord {
        DeviceRecord::new(ip.parse().unwrap()).with_status(status)
    }

    #[test]
    fn test_append_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::in_dir(&dir.path().join("nested"));

        for n in 1..=3 {
            let mut params = HashMap::new();
            params.insert("subnet".to_string(), format!("10.0.{}.0/24", n));
            log.append(&HistoryEntry::new(params, vec![device("10.0.0.1", DeviceStatus::Online)]))
                .unwrap();
        }

        let last_two = log.tail(2).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].params["subnet"], "10.0.2.0/24");
        assert_eq!(last_two[1].params["subnet"], "10.0.3.0/24");
        assert_eq!(log.tail(10).unwrap().len(), 3);
    }

    #[test]
    fn test_tail_skips_garbage_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::in_dir(dir.path());
        assert!(log.tail(5).unwrap().is_empty());

        log.append(&HistoryEntry::new(HashMap::new(), Vec::new())).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        assert_eq!(log.tail(5).unwrap().len(), 1);
    }

    #[test]
    fn test_entry_shape() {
        let entry = HistoryEntry::new(HashMap::new(), vec![device("10.0.0.9", DeviceStatus::Offline)]);
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json["ts"].is_string());
        assert!(json["params"].is_object());
        assert_eq!(json["result"][0]["status"], "offline");
    }

    #[test]
    fn test_diff_online_devices() {
        let old = HistoryEntry::new(
            HashMap::new(),
            vec![device("10.0.0.1", DeviceStatus::Online), device("10.0.0.2", DeviceStatus::Online)],
        );
        let new = HistoryEntry::new(
            HashMap::new(),
            vec![
                device("10.0.0.2", DeviceStatus::Online),
                device("10.0.0.1", DeviceStatus::Offline),
                device("10.0.0.3", DeviceStatus::Online),
            ],
        );

        let diff = HistoryDiff::between(&old, &new);
        assert_eq!(diff.appeared, vec!["10.0.0.3".parse::<Ipv4Addr>().unwrap()]);
        assert_eq!(diff.disappeared, vec!["10.0.0.1".parse::<Ipv4Addr>().unwrap()]);
        assert!(HistoryDiff::between(&old, &old).is_empty());
    }
}
