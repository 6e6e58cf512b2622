//! Wi-Fi stations associated with local access-point interfaces

use super::leases::DhcpLease;
use crate::device::{canonical_mac, DeviceKind, DeviceStatus};
use crate::platform::Platform;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// A wireless interface from `iw dev`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessInterface {
    pub name: String,
    pub mode: Option<String>,
}

impl WirelessInterface {
    pub fn is_access_point(&self) -> bool {
        self.mode.as_deref().map_or(false, |m| m.eq_ignore_ascii_case("ap"))
    }
}

/// One associated client, keyed by MAC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiStation {
    pub mac: String,
    pub ip: Option<Ipv4Addr>,
    pub name: String,
    pub status: DeviceStatus,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
}

/// Parse `iw dev` into interfaces and their `type`
pub fn parse_iw_dev(output: &str) -> Vec<WirelessInterface> {
    let mut interfaces = Vec::new();
    let mut current: Option<WirelessInterface> = None;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Interface ") {
            interfaces.extend(current.take());
            current = rest.split_whitespace().next().map(|name| WirelessInterface {
                name: name.to_string(),
                mode: None,
            });
        } else if let (Some(rest), Some(iface)) = (line.strip_prefix("type "), current.as_mut()) {
            iface.mode = rest.split_whitespace().next().map(str::to_string);
        }
    }
    interfaces.extend(current);
    interfaces
}

/// Station MACs from `iw dev <if> station dump`
pub fn parse_station_dump(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.to_lowercase().starts_with("station "))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(canonical_mac)
        .collect()
}

/// Build station records, attaching IP from the neighbor table or leases and
/// a name from leases
pub fn correlate_stations(
    macs: &[String],
    neighbors: &HashMap<Ipv4Addr, String>,
    leases: &[DhcpLease],
) -> Vec<WifiStation> {
    let mut mac_to_ip: HashMap<&str, Ipv4Addr> = neighbors.iter().map(|(ip, mac)| (mac.as_str(), *ip)).collect();
    let mut mac_to_name: HashMap<&str, &str> = HashMap::new();
    for lease in leases {
        if let Some(mac) = lease.mac.as_deref() {
            mac_to_ip.insert(mac, lease.ip);
            if let Some(name) = lease.name.as_deref() {
                mac_to_name.insert(mac, name);
            }
        }
    }

    macs.iter()
        .map(|mac| {
            let ip = mac_to_ip.get(mac.as_str()).copied();
            let name = mac_to_name
                .get(mac.as_str())
                .map(|n| n.to_string())
                .or_else(|| ip.map(|ip| ip.to_string()))
                .unwrap_or_else(|| mac.clone());
            WifiStation {
                mac: mac.clone(),
                ip,
                name,
                status: DeviceStatus::Online,
                kind: DeviceKind::WifiStation,
            }
        })
        .collect()
}

/// Stations on every AP-mode interface; empty when `iw` is missing or fails
pub async fn discover_wifi_stations(
    platform: &dyn Platform,
    neighbors: &HashMap<Ipv4Addr, String>,
    leases: &[DhcpLease],
    limit: Duration,
) -> Vec<WifiStation> {
    if platform.locate("iw").is_none() {
        return Vec::new();
    }

    let interfaces = match run_iw(platform, &["dev"], limit).await {
        Some(out) => parse_iw_dev(&out),
        None => return Vec::new(),
    };

    let mut macs = Vec::new();
    for iface in interfaces.iter().filter(|i| i.is_access_point()) {
        if let Some(out) = run_iw(platform, &["dev", &iface.name, "station", "dump"], limit).await {
            macs.extend(parse_station_dump(&out));
        }
    }

    debug!("Found {} Wi-Fi stations", macs.len());
    correlate_stations(&macs, neighbors, leases)
}

async fn run_iw(platform: &dyn Platform, args: &[&str], limit: Duration) -> Option<String> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    match platform.run("iw", &args, limit).await {
        Ok(out) if !out.is_unusable() => Some(out.stdout),
        Ok(_) => None,
        Err(e) => {
            debug!("iw {:?} failed: {}", args, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IW_DEV: &str = "phy#1\n\
\tInterface wlan1\n\
\t\tifindex 4\n\
\t\twdev 0x100000001\n\
\t\taddr 00:11:22:33:44:55\n\
\t\tssid lab\n\
\t\ttype AP\n\
phy#0\n\
\tInterface wlan0\n\
\t\tifindex 3\n\
\t\ttype managed\n";

    const STATION_DUMP: &str = "Station aa:bb:cc:dd:ee:01 (on wlan1)\n\
\tinactive time:\t300 ms\n\
\trx bytes:\t12345\n\
Station aa:bb:cc:dd:ee:02 (on wlan1)\n\
\tinactive time:\t10 ms\n\
Station not-a-mac (on wlan1)\n";

    #[test]
    fn test_parse_iw_dev() {
        let interfaces = parse_iw_dev(IW_DEV);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].name, "wlan1");
        assert!(interfaces[0].is_access_point());
        assert!(!interfaces[1].is_access_point());
    }

    #[test]
    fn test_parse_station_dump() {
        assert_eq!(parse_station_dump(STATION_DUMP), vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"]);
    }

    #[test]
    fn test_correlate_stations() {
        let macs = vec![
            "AA:BB:CC:DD:EE:01".to_string(),
            "AA:BB:CC:DD:EE:02".to_string(),
            "AA:BB:CC:DD:EE:03".to_string(),
        ];
        let mut neighbors = HashMap::new();
        neighbors.insert("192.0.2.2".parse().unwrap(), "AA:BB:CC:DD:EE:02".to_string());
        let leases = vec![DhcpLease::new("192.0.2.1".parse().unwrap(), "aa:bb:cc:dd:ee:01", "phone")];

        let stations = correlate_stations(&macs, &neighbors, &leases);
        assert_eq!(stations[0].name, "phone");
        assert_eq!(stations[0].ip, Some("192.0.2.1".parse().unwrap()));
        assert_eq!(stations[1].name, "192.0.2.2");
        assert_eq!(stations[2].name, "AA:BB:CC:DD:EE:03");
        assert_eq!(stations[2].ip, None);
        assert!(stations.iter().all(|s| s.kind == DeviceKind::WifiStation));
    }
}
