//! Kernel neighbor (ARP) cache

use crate::device::canonical_mac;
use crate::platform::Platform;
use log::debug;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// `ip -> MAC` for every neighbor entry with a resolved link-layer address
pub async fn arp_neighbors(platform: &dyn Platform, limit: Duration) -> HashMap<Ipv4Addr, String> {
    if platform.locate("ip").is_none() {
        return HashMap::new();
    }

    let args = vec!["neigh".to_string(), "show".to_string()];
    match platform.run("ip", &args, limit).await {
        Ok(output) if output.success => parse_ip_neigh(&output.stdout),
        Ok(output) => {
            debug!("ip neigh exited with {:?}", output.exit_code);
            HashMap::new()
        }
        Err(e) => {
            debug!("ip neigh failed: {}", e);
            HashMap::new()
        }
    }
}

/// Parse `ip neigh show` lines such as
/// `192.168.1.10 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
pub fn parse_ip_neigh(output: &str) -> HashMap<Ipv4Addr, String> {
    let mut neighbors = HashMap::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 || parts[1] != "dev" {
            continue;
        }
        let Ok(ip) = parts[0].parse::<Ipv4Addr>() else {
            continue;
        };
        let mac = parts
            .windows(2)
            .find(|pair| pair[0] == "lladdr")
            .and_then(|pair| canonical_mac(pair[1]));

        if let Some(mac) = mac {
            neighbors.insert(ip, mac);
        }
    }

    neighbors
}
