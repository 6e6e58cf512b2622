//! External scan tools: `arp-scan` (layer 2) and `nmap -sn` (active discovery)

use super::{Backend, ProbeOutcome};
use crate::device::PartialRecord;
use crate::platform::Platform;
use ipnetwork::Ipv4Network;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;
use std::time::Duration;

static REPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\S.*?report for\s+(?:(.+?)\s+\(([0-9.]+)\)|(\S+))\s*$").expect("valid regex")
});

static MAC_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^MAC Address:\s*(\S+)(?:\s+\((.*)\))?").expect("valid regex"));

const ARP_SCAN_BANNERS: [&str; 3] = ["Interface:", "Starting", "Ending"];

/// Arguments for the layer-2 scanner against one CIDR
pub fn layer2_args(cidr: Ipv4Network) -> Vec<String> {
    vec!["--numeric".to_string(), "--timeout=200".to_string(), cidr.to_string()]
}

/// Arguments for the active discovery scanner against one CIDR
pub fn active_discovery_args(cidr: Ipv4Network) -> Vec<String> {
    vec!["-sn".to_string(), cidr.to_string()]
}

/// Run `arp-scan` and parse its output
pub async fn run_layer2(platform: &dyn Platform, cidr: Ipv4Network, limit: Duration) -> ProbeOutcome {
    run_tool(platform, Backend::Layer2, &layer2_args(cidr), limit, parse_arp_scan).await
}

/// Run `nmap -sn` and parse its output
pub async fn run_active_discovery(platform: &dyn Platform, cidr: Ipv4Network, limit: Duration) -> ProbeOutcome {
    run_tool(platform, Backend::ActiveDiscovery, &active_discovery_args(cidr), limit, parse_nmap_sn).await
}

async fn run_tool(
    platform: &dyn Platform,
    backend: Backend,
    args: &[String],
    limit: Duration,
    parse: fn(&str) -> Vec<PartialRecord>,
) -> ProbeOutcome {
    let program = backend.program();
    if platform.locate(program).is_none() {
        return ProbeOutcome::Unavailable;
    }

    let output = match platform.run(program, args, limit).await {
        Ok(output) => output,
        Err(e) => return ProbeOutcome::from_error(e),
    };

    if output.is_unusable() {
        return ProbeOutcome::Failed(format!(
            "{} exited with {:?} and {} bytes of output",
            program,
            output.exit_code,
            output.stdout.trim().len()
        ));
    }

    let records = parse(&output.stdout);
    info!("{} reported {} hosts", backend, records.len());
    ProbeOutcome::Success(records)
}

/// Parse `arp-scan` output: `IP<TAB>MAC<TAB>vendor` lines between banners
pub fn parse_arp_scan(output: &str) -> Vec<PartialRecord> {
    let mut records = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || ARP_SCAN_BANNERS.iter().any(|b| line.starts_with(b)) {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() < 2 {
            continue;
        }
        let Ok(ip) = fields[0].parse::<Ipv4Addr>() else {
            continue;
        };

        let mut record = PartialRecord::new(ip).mac(fields[1]);
        if let Some(vendor) = fields.get(2).filter(|v| !v.starts_with("(Unknown")) {
            record = record.vendor(*vendor);
        }
        records.push(record);
    }

    debug!("Parsed {} arp-scan records", records.len());
    records
}

/// Parse `nmap -sn` normal output into one record per report block
pub fn parse_nmap_sn(output: &str) -> Vec<PartialRecord> {
    let mut records = Vec::new();
    let mut current: Option<PartialRecord> = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(caps) = REPORT_LINE.captures(line) {
            flush(&mut records, current.take());

            let (name, ip) = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(name), Some(ip), _) => (Some(name.as_str()), ip.as_str()),
                (_, _, Some(ip)) => (None, ip.as_str()),
                _ => continue,
            };

            // A bare token that is not an address leaves an empty block
            current = Some(match ip.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    let record = PartialRecord::new(ip);
                    match name {
                        Some(name) => record.name(name),
                        None => record,
                    }
                }
                Err(_) => PartialRecord::default(),
            });
            continue;
        }

        if let (Some(record), Some(caps)) = (current.as_mut(), MAC_LINE.captures(line)) {
            let updated = std::mem::take(record).mac(&caps[1]);
            *record = match caps.get(2).map(|m| m.as_str()) {
                Some(vendor) if !vendor.eq_ignore_ascii_case("unknown") => updated.vendor(vendor),
                _ => updated,
            };
        }
    }
    flush(&mut records, current);

    debug!("Parsed {} nmap records", records.len());
    records
}

fn flush(records: &mut Vec<PartialRecord>, current: Option<PartialRecord>) {
    if let Some(record) = current.filter(|r| r.ip.is_some()) {
        records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARP_SCAN_OUTPUT: &str = "Interface: eth0, type: EN10MB, MAC: 02:42:ac:11:00:02, IPv4: 192.168.1.5\n\
Starting arp-scan 1.9.7 with 256 hosts (https://github.com/royhills/arp-scan)\n\
192.168.1.1\t00:50:56:c0:00:08\tVMware, Inc.\n\
192.168.1.20\tb8-27-eb-12-34-56\tRaspberry Pi Foundation\n\
192.168.1.30\t3c:22:fb:aa:bb:cc\t(Unknown)\n\
not-an-ip\t00:11:22:33:44:55\tBogus\n\
192.168.1.40\n\
\n\
3 packets received by filter, 0 packets dropped by kernel\n\
Ending arp-scan 1.9.7: 256 hosts scanned in 1.955 seconds (130.95 hosts/sec). 3 responded\n";

    const NMAP_OUTPUT: &str = "Starting Nmap 7.94 ( https://nmap.org ) at 2024-01-01 12:00 UTC\n\
Nmap scan report for router.lan (192.168.1.1)\n\
Host is up (0.0021s latency).\n\
MAC Address: 00:50:56:C0:00:08 (VMware)\n\
Nmap scan report for 192.168.1.42\n\
Host is up (0.0050s latency).\n\
MAC Address: AA:BB:CC:DD:EE:FF (Unknown)\n\
Nmap scan report for 192.168.1.5\n\
Host is up.\n\
Nmap done: 256 IP addresses (3 hosts up) scanned in 2.31 seconds\n";

    #[test]
    fn test_parse_arp_scan() {
        let records = parse_arp_scan(ARP_SCAN_OUTPUT);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].ip, Some("192.168.1.1".parse().unwrap()));
        assert_eq!(records[0].mac.as_deref(), Some("00:50:56:C0:00:08"));
        assert_eq!(records[0].vendor.as_deref(), Some("VMware, Inc."));

        assert_eq!(records[1].mac.as_deref(), Some("B8:27:EB:12:34:56"));
        assert_eq!(records[2].vendor, None);
    }

    #[test]
    fn test_parse_nmap_sn() {
        let records = parse_nmap_sn(NMAP_OUTPUT);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].name.as_deref(), Some("router.lan"));
        assert_eq!(records[0].ip, Some("192.168.1.1".parse().unwrap()));
        assert_eq!(records[0].vendor.as_deref(), Some("VMware"));

        assert_eq!(records[1].name, None);
        assert_eq!(records[1].mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(records[1].vendor, None);

        assert_eq!(records[2].ip, Some("192.168.1.5".parse().unwrap()));
        assert_eq!(records[2].mac, None);
    }

    #[test]
    fn test_nmap_block_without_ip_is_dropped() {
        let output = "Nmap scan report for somehost\nMAC Address: AA:BB:CC:DD:EE:FF (X)\n\
Nmap scan report for 10.0.0.9\n";
        let records = parse_nmap_sn(output);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip, Some("10.0.0.9".parse().unwrap()));
        assert_eq!(records[0].mac, None);
    }

    #[test]
    fn test_tool_args() {
        let cidr: Ipv4Network = "192.168.1.0/24".parse().unwrap();
        assert_eq!(layer2_args(cidr), vec!["--numeric", "--timeout=200", "192.168.1.0/24"]);
        assert_eq!(active_discovery_args(cidr), vec!["-sn", "192.168.1.0/24"]);
    }

    #[test]
    fn test_empty_output_parses_to_nothing() {
        assert!(parse_arp_scan("").is_empty());
        assert!(parse_nmap_sn("").is_empty());
    }
}
