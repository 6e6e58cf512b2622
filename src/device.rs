//! Device records produced by a scan
//!
//! A [`DeviceRecord`] is the normalized, final shape; a [`PartialRecord`] is
//! what a single backend or enrichment source knows about a host.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Liveness of a host as far as the scan could tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Online
    }
}

/// Provenance / category tag of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Unknown,
    Ssdp,
    Mdns,
    WifiStation,
}

impl Default for DeviceKind {
    fn default() -> Self {
        DeviceKind::Unknown
    }
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Unknown => "unknown",
            DeviceKind::Ssdp => "ssdp",
            DeviceKind::Mdns => "mdns",
            DeviceKind::WifiStation => "wifi-station",
        }
    }
}

/// One host in a scan result, keyed by `ip`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    pub ip: Ipv4Addr,
    pub status: DeviceStatus,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub mac: Option<String>,
    pub vendor: Option<String>,
}

impl DeviceRecord {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            name: ip.to_string(),
            ip,
            status: DeviceStatus::Online,
            kind: DeviceKind::Unknown,
            mac: None,
            vendor: None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.name = name;
        }
        self
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the MAC if it canonicalizes; anything else is dropped.
    pub fn with_mac(mut self, mac: &str) -> Self {
        self.mac = canonical_mac(mac);
        self
    }

    pub fn with_vendor<S: Into<String>>(mut self, vendor: S) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

/// What one source observed about a host; every field but `ip` may be unknown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    pub ip: Option<Ipv4Addr>,
    pub name: Option<String>,
    pub status: Option<DeviceStatus>,
    pub kind: Option<DeviceKind>,
    pub mac: Option<String>,
    pub vendor: Option<String>,
}

impl PartialRecord {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip: Some(ip),
            ..Default::default()
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        let name = name.into();
        self.name = if name.trim().is_empty() { None } else { Some(name) };
        self
    }

    pub fn status(mut self, status: DeviceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(mut self, kind: DeviceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn mac(mut self, mac: &str) -> Self {
        self.mac = canonical_mac(mac);
        self
    }

    pub fn vendor<S: Into<String>>(mut self, vendor: S) -> Self {
        let vendor = vendor.into();
        self.vendor = if vendor.trim().is_empty() { None } else { Some(vendor) };
        self
    }

    /// Finalize into a [`DeviceRecord`]; `None` without an address.
    ///
    /// Missing status becomes online, missing kind unknown, missing name the IP.
    pub fn into_record(self) -> Option<DeviceRecord> {
        let ip = self.ip?;
        let mut record = DeviceRecord::new(ip)
            .with_status(self.status.unwrap_or_default())
            .with_kind(self.kind.unwrap_or_default());
        if let Some(name) = self.name {
            record = record.with_name(name);
        }
        record.mac = self.mac.as_deref().and_then(canonical_mac);
        record.vendor = self.vendor.filter(|v| !v.trim().is_empty());
        Some(record)
    }
}

/// Uppercase, trim and turn hyphens into colons. Idempotent.
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_uppercase().replace('-', ":")
}

/// Normalize and validate a MAC into `AA:BB:CC:DD:EE:FF`.
///
/// Accepts hyphen or colon separators, mixed case, bare 12-digit hex and the
/// single-digit octets some `arp` implementations print (`0:1a:2b:...`).
/// Returns `None` for anything that is not six octets of hex.
pub fn canonical_mac(mac: &str) -> Option<String> {
    let normalized = normalize_mac(mac);
    if normalized.is_empty() || !normalized.is_ascii() {
        return None;
    }

    let octets: Vec<String> = if normalized.contains(':') {
        normalized.split(':').map(|o| o.to_string()).collect()
    } else if normalized.len() == 12 {
        (0..6).map(|i| normalized[i * 2..i * 2 + 2].to_string()).collect()
    } else {
        return None;
    };

    if octets.len() != 6 {
        return None;
    }

    let mut out = Vec::with_capacity(6);
    for octet in octets {
        if octet.is_empty() || octet.len() > 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        out.push(format!("{:0>2}", octet));
    }
    Some(out.join(":"))
}

/// First three octets of a canonical MAC
pub fn oui_prefix(mac: &str) -> Option<String> {
    canonical_mac(mac).map(|m| m[..8].to_string())
}
