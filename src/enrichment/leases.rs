//! DHCP lease files (dnsmasq line format and ISC dhcpd block format)

use crate::device::{canonical_mac, PartialRecord};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;
use std::path::Path;

static LEASE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)lease\s+(\d+\.\d+\.\d+\.\d+)\s*\{(.*?)\}").expect("valid regex"));

static HARDWARE_ETHERNET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)hardware\s+ethernet\s+([0-9a-f:]+);").expect("valid regex"));

static CLIENT_HOSTNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)client-hostname\s+"([^"]+)";"#).expect("valid regex"));

/// One lease entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLease {
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub name: Option<String>,
}

impl DhcpLease {
    pub fn new(ip: Ipv4Addr, mac: &str, name: &str) -> Self {
        let name = name.trim();
        Self {
            ip,
            mac: canonical_mac(mac),
            name: (!name.is_empty() && name != "*").then(|| name.to_string()),
        }
    }

    pub fn to_partial(&self) -> PartialRecord {
        let mut record = PartialRecord::new(self.ip);
        record.mac = self.mac.clone();
        record.name = self.name.clone();
        record
    }
}

/// Parse dnsmasq leases: `<expiry> <mac> <ip> <hostname> <client-id>`
pub fn parse_dnsmasq_leases(text: &str) -> Vec<DhcpLease> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let ip = parts[2].parse::<Ipv4Addr>().ok()?;
            Some(DhcpLease::new(ip, parts[1], parts[3]))
        })
        .collect()
}

/// Parse ISC dhcpd `lease <ip> { ... }` blocks
pub fn parse_dhcpd_leases(text: &str) -> Vec<DhcpLease> {
    LEASE_BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let ip = caps[1].parse::<Ipv4Addr>().ok()?;
            let body = &caps[2];
            let mac = HARDWARE_ETHERNET.captures(body).map(|c| c[1].to_string()).unwrap_or_default();
            let name = CLIENT_HOSTNAME.captures(body).map(|c| c[1].to_string()).unwrap_or_default();
            Some(DhcpLease::new(ip, &mac, &name))
        })
        .collect()
}

/// Lease file contents; a missing or unreadable file reads as empty
pub async fn read_lease_file(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("Lease file {} not readable: {}", path.display(), e);
            String::new()
        }
    }
}

/// All leases from both well-known files, dnsmasq first
pub async fn discover_dhcp_leases(dnsmasq: &Path, dhcpd: &Path) -> Vec<DhcpLease> {
    let (line_format, block_format) = tokio::join!(read_lease_file(dnsmasq), read_lease_file(dhcpd));

    let mut leases = parse_dnsmasq_leases(&line_format);
    leases.extend(parse_dhcpd_leases(&block_format));
    debug!("Found {} DHCP leases", leases.len());
    leases
}
