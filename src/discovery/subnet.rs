//! Local IPv4 subnet resolution from interface configuration

use crate::platform::Platform;
use ipnetwork::Ipv4Network;
use log::{debug, warn};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::timeout;

/// Prefix assumed when only the hostname address is known
const FALLBACK_PREFIX: u8 = 24;

#[derive(Debug, Deserialize)]
struct RouteEntry {
    dev: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InterfaceEntry {
    ifname: Option<String>,
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct AddrInfo {
    family: Option<String>,
    local: Option<String>,
    prefixlen: Option<u8>,
}

impl AddrInfo {
    fn ipv4_network(&self) -> Option<Ipv4Network> {
        if self.family.as_deref() != Some("inet") {
            return None;
        }
        let local: Ipv4Addr = self.local.as_deref()?.parse().ok()?;
        containing_network(local, self.prefixlen?)
    }
}

/// Network with host bits zeroed
pub fn containing_network(addr: Ipv4Addr, prefix: u8) -> Option<Ipv4Network> {
    let net = Ipv4Network::new(addr, prefix).ok()?;
    Ipv4Network::new(net.network(), prefix).ok()
}

/// Timeouts for the commands and lookups behind subnet resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveLimits {
    pub ip: Duration,
    pub dns: Duration,
}

/// Primary CIDR: default-route interface, else hostname address as a /24
pub async fn discover_primary_cidr(platform: &dyn Platform, limits: ResolveLimits) -> Option<Ipv4Network> {
    if let Some(net) = default_route_cidr(platform, limits.ip).await {
        debug!("Primary subnet from default route: {}", net);
        return Some(net);
    }

    let addr = match timeout(limits.dns, platform.hostname_address()).await {
        Ok(addr) => addr?,
        Err(_) => {
            warn!("Hostname lookup exceeded {:?}", limits.dns);
            return None;
        }
    };
    if addr.is_loopback() {
        debug!("Hostname resolves to loopback, no primary subnet");
        return None;
    }
    let net = containing_network(addr, FALLBACK_PREFIX)?;
    debug!("Primary subnet from hostname heuristic: {}", net);
    Some(net)
}

async fn default_route_cidr(platform: &dyn Platform, ip_timeout: Duration) -> Option<Ipv4Network> {
    platform.locate("ip")?;

    let routes = run_ip(platform, &["-j", "route", "show", "default"], ip_timeout).await?;
    let routes: Vec<RouteEntry> = parse_json(&routes)?;
    let dev = routes.into_iter().next()?.dev?;

    let addrs = run_ip(platform, &["-j", "addr", "show", "dev", &dev], ip_timeout).await?;
    let interfaces: Vec<InterfaceEntry> = parse_json(&addrs)?;
    interfaces
        .iter()
        .flat_map(|iface| iface.addr_info.iter())
        .find_map(AddrInfo::ipv4_network)
}

/// Every sweepable IPv4 CIDR on non-loopback interfaces, in discovery order.
///
/// Falls back to [`discover_primary_cidr`] when the interface walk finds
/// nothing usable.
pub async fn discover_all_cidrs(platform: &dyn Platform, max_prefix: u8, limits: ResolveLimits) -> Vec<Ipv4Network> {
    let mut cidrs = Vec::new();

    if platform.locate("ip").is_some() {
        if let Some(out) = run_ip(platform, &["-j", "addr"], limits.ip).await {
            cidrs = parse_interface_cidrs(&out, max_prefix);
        }
    }

    if cidrs.is_empty() {
        if let Some(primary) = discover_primary_cidr(platform, limits).await {
            cidrs.push(primary);
        }
    }
    cidrs
}

/// Parse `ip -j addr` output into filtered, de-duplicated CIDRs
pub fn parse_interface_cidrs(json: &str, max_prefix: u8) -> Vec<Ipv4Network> {
    let interfaces: Vec<InterfaceEntry> = match parse_json(json) {
        Some(interfaces) => interfaces,
        None => return Vec::new(),
    };

    let mut cidrs: Vec<Ipv4Network> = Vec::new();
    for iface in &interfaces {
        let Some(name) = iface.ifname.as_deref() else { continue };
        if name.starts_with("lo") {
            continue;
        }
        for info in &iface.addr_info {
            let Some(net) = info.ipv4_network() else { continue };
            if is_sweepable(net, max_prefix) && !cidrs.contains(&net) {
                cidrs.push(net);
            }
        }
    }
    cidrs
}

/// Filters applied to interface networks before they are offered for sweeping
pub fn is_sweepable(net: Ipv4Network, max_prefix: u8) -> bool {
    let base = net.network();
    if base.is_loopback() || base.is_link_local() {
        return false;
    }
    if net.prefix() <= 8 && !base.is_private() {
        return false;
    }
    net.prefix() <= max_prefix
}

async fn run_ip(platform: &dyn Platform, args: &[&str], ip_timeout: Duration) -> Option<String> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    match platform.run("ip", &args, ip_timeout).await {
        Ok(out) if !out.is_unusable() => Some(out.stdout),
        Ok(out) => {
            debug!("ip {:?} gave no usable output (exit {:?})", args, out.exit_code);
            None
        }
        Err(e) => {
            debug!("ip {:?} failed: {}", args, e);
            None
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    match serde_json::from_str(text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Unparseable ip JSON output: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_ADDR: &str = r#"[
        {"ifindex":1,"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8}]},
        {"ifindex":2,"ifname":"eth0","addr_info":[
            {"family":"inet","local":"192.168.1.23","prefixlen":24},
            {"family":"inet6","local":"fe80::1","prefixlen":64},
            {"family":"inet","local":"192.168.1.99","prefixlen":24}
        ]},
        {"ifindex":3,"ifname":"wlan0","addr_info":[{"family":"inet","local":"169.254.3.4","prefixlen":16}]},
        {"ifindex":4,"ifname":"tun0","addr_info":[{"family":"inet","local":"10.8.0.2","prefixlen":32}]},
        {"ifindex":5,"ifname":"eth1","addr_info":[{"family":"inet","local":"44.1.2.3","prefixlen":8}]},
        {"ifindex":6,"ifname":"eth2","addr_info":[{"family":"inet","local":"10.20.30.40","prefixlen":8}]},
        {"ifindex":7,"ifname":"docker0","addr_info":[{"family":"inet","local":"172.17.0.1","prefixlen":16}]},
        {"ifindex":8,"addr_info":[{"family":"inet","local":"192.0.2.1","prefixlen":24}]}
    ]"#;

    #[test]
    fn test_parse_interface_cidrs_filters_and_dedups() {
        let cidrs: Vec<String> = parse_interface_cidrs(IP_ADDR, 30).iter().map(|n| n.to_string()).collect();
        assert_eq!(cidrs, vec!["192.168.1.0/24", "10.0.0.0/8", "172.17.0.0/16"]);
    }

    #[test]
    fn test_max_prefix_is_respected() {
        let cidrs = parse_interface_cidrs(IP_ADDR, 16);
        assert!(cidrs.iter().all(|n| n.prefix() <= 16));
        assert_eq!(cidrs.len(), 2);
    }

    #[test]
    fn test_garbage_json_is_empty() {
        assert!(parse_interface_cidrs("not json", 30).is_empty());
        assert!(parse_interface_cidrs("{}", 30).is_empty());
    }

    #[test]
    fn test_containing_network_zeroes_host_bits() {
        let net = containing_network("10.1.2.3".parse().unwrap(), 22).unwrap();
        assert_eq!(net.to_string(), "10.1.0.0/22");
        assert!(containing_network("10.1.2.3".parse().unwrap(), 33).is_none());
    }

    #[test]
    fn test_is_sweepable() {
        let net = |s: &str| s.parse::<Ipv4Network>().unwrap();
        assert!(is_sweepable(net("192.168.0.0/24"), 30));
        assert!(!is_sweepable(net("192.168.0.0/31"), 30));
        assert!(!is_sweepable(net("169.254.0.0/16"), 30));
        assert!(!is_sweepable(net("8.0.0.0/8"), 30));
        assert!(is_sweepable(net("10.0.0.0/8"), 30));
    }
}
