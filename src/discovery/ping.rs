//! Concurrent ICMP sweep through the system `ping` utility

use crate::device::{DeviceStatus, PartialRecord};
use crate::platform::Platform;
use futures::future::join_all;
use ipnetwork::Ipv4Network;
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Sweep tuning
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub timeout_per_host: Duration,
    pub workers: usize,
    pub max_hosts: usize,
    pub include_offline: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            timeout_per_host: Duration::from_millis(800),
            workers: 128,
            max_hosts: 65_536,
            include_offline: false,
        }
    }
}

/// Number of addresses [`hosts`] would return, without building them
pub fn host_count(cidr: Ipv4Network) -> u64 {
    match cidr.prefix() {
        32 => 1,
        31 => 2,
        p => (1u64 << (32 - p)) - 2,
    }
}

/// Usable host addresses of a network.
///
/// A /32 is its own single host and a /31 has two; everything larger drops
/// the network and broadcast addresses.
pub fn hosts(cidr: Ipv4Network) -> Vec<Ipv4Addr> {
    let start = u32::from(cidr.network());
    let end = u32::from(cidr.broadcast());
    let range = match cidr.prefix() {
        31 | 32 => start..=end,
        _ => start + 1..=end - 1,
    };
    range.map(Ipv4Addr::from).collect()
}

/// `ping` arguments for one echo with the host OS's timeout flag
pub fn ping_args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1);
    let mut args: Vec<String> = if cfg!(windows) {
        vec!["-n".into(), "1".into(), "-w".into(), millis.to_string()]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-W".into(), millis.to_string()]
    } else {
        let secs = ((millis + 999) / 1000).max(1);
        vec!["-c".into(), "1".into(), "-W".into(), secs.to_string()]
    };
    args.push(ip.to_string());
    args
}

/// Hard limit on the `ping` process itself
pub fn process_limit(timeout: Duration) -> Duration {
    (timeout * 2).max(Duration::from_secs(1))
}

/// One echo request; any failure counts as no reply
pub async fn ping_once(platform: &dyn Platform, ip: Ipv4Addr, timeout: Duration) -> bool {
    match platform.run("ping", &ping_args(ip, timeout), process_limit(timeout)).await {
        Ok(output) => output.success,
        Err(e) => {
            debug!("ping {} failed: {}", ip, e);
            false
        }
    }
}

/// Ping every host of `cidr` with bounded concurrency.
///
/// Records come back in address order. Responders are online; silent hosts
/// are kept as offline only when `include_offline` is set. Names are left
/// for the caller to resolve.
pub async fn sweep(platform: &dyn Platform, cidr: Ipv4Network, options: &SweepOptions) -> Vec<PartialRecord> {
    let count = host_count(cidr);
    if count > options.max_hosts as u64 {
        warn!("Refusing to ping sweep {} ({} hosts, limit {})", cidr, count, options.max_hosts);
        return Vec::new();
    }

    let targets = hosts(cidr);
    info!("Ping sweep of {} across {} hosts", cidr, targets.len());

    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let probes = targets.into_iter().map(|ip| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore.acquire().await.ok()?;
            let alive = ping_once(platform, ip, options.timeout_per_host).await;
            if alive {
                Some(PartialRecord::new(ip).status(DeviceStatus::Online))
            } else if options.include_offline {
                Some(PartialRecord::new(ip).name(ip.to_string()).status(DeviceStatus::Offline))
            } else {
                None
            }
        }
    });

    let records: Vec<PartialRecord> = join_all(probes).await.into_iter().flatten().collect();
    debug!(
        "Ping sweep of {} done: {} online",
        cidr,
        records.iter().filter(|r| r.status == Some(DeviceStatus::Online)).count()
    );
    records
}
