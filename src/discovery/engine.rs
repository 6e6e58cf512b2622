//! Scan engine - backend selection, normalization and enrichment

use super::backends::{run_active_discovery, run_layer2};
use super::ping::{self, SweepOptions};
use super::subnet::{self, ResolveLimits};
use super::{Backend, ProbeOutcome};
use crate::config::ScanConfig;
use crate::device::{DeviceRecord, PartialRecord};
use crate::enrichment::{
    arp_neighbors, detect_browser, discover_dhcp_leases, discover_mdns_devices, discover_ssdp_devices,
    discover_wifi_stations, DhcpLease, EnrichmentBatch, MdnsBrowser, OuiTable, WifiStation,
};
use crate::merge::{fill_neighbor_macs, fill_vendors, merge, DeviceIndex};
use crate::platform::{Platform, SystemPlatform};
use crate::request::{ScanRequest, SubnetSpec};
use futures::future::join_all;
use ipnetwork::Ipv4Network;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Devices found by one scan plus the subnets that were swept
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub subnets: Vec<String>,
    pub devices: Vec<DeviceRecord>,
    pub duration_ms: u64,
}

impl ScanReport {
    /// No subnet was given and none could be discovered
    pub fn no_subnet(&self) -> bool {
        self.subnets.is_empty()
    }
}

/// Main discovery engine
pub struct ScanEngine {
    config: ScanConfig,
    platform: Arc<dyn Platform>,
    mdns: Arc<dyn MdnsBrowser>,
    oui: OnceCell<OuiTable>,
}

impl ScanEngine {
    /// Engine against the real system
    pub fn new(config: ScanConfig) -> Self {
        Self::with_platform(config, Arc::new(SystemPlatform::new()), detect_browser())
    }

    /// Engine with injected OS access and mDNS capability
    pub fn with_platform(config: ScanConfig, platform: Arc<dyn Platform>, mdns: Arc<dyn MdnsBrowser>) -> Self {
        Self {
            config,
            platform,
            mdns,
            oui: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Vendor table, loaded on first use
    pub fn oui(&self) -> &OuiTable {
        self.oui.get_or_init(|| OuiTable::load(self.config.oui_path.as_deref()))
    }

    pub async fn discover_primary_cidr(&self) -> Option<Ipv4Network> {
        subnet::discover_primary_cidr(self.platform.as_ref(), self.resolve_limits()).await
    }

    pub async fn discover_all_cidrs(&self, max_prefix: u8) -> Vec<Ipv4Network> {
        subnet::discover_all_cidrs(self.platform.as_ref(), max_prefix, self.resolve_limits()).await
    }

    /// Run a scan and return its devices
    pub async fn scan(&self, request: &ScanRequest) -> Vec<DeviceRecord> {
        self.scan_report(request).await.devices
    }

    /// Run a scan. Never fails: the worst case is an empty report.
    pub async fn scan_report(&self, request: &ScanRequest) -> ScanReport {
        let start = Instant::now();

        let cidrs = match request.subnet {
            Some(SubnetSpec::Cidr(cidr)) => vec![cidr],
            Some(SubnetSpec::All) => self.discover_all_cidrs(self.config.max_prefix).await,
            None => self.discover_primary_cidr().await.into_iter().collect(),
        };

        if cidrs.is_empty() {
            warn!("No subnet to scan could be determined");
            return ScanReport::default();
        }

        info!(
            "Scanning {} subnet(s) with method={} include_offline={} deep={}",
            cidrs.len(),
            request.method,
            request.include_offline,
            request.deep
        );

        let devices = match request.subnet {
            Some(SubnetSpec::All) => self.scan_many(&cidrs, request).await,
            _ => self.scan_cidr(cidrs[0], request).await,
        };

        let report = ScanReport {
            subnets: cidrs.iter().map(|c| c.to_string()).collect(),
            devices,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!("Scan finished: {} devices in {} ms", report.devices.len(), report.duration_ms);
        report
    }

    /// Scan several subnets concurrently; the first subnet to report an IP
    /// owns it. Enrichment runs once and is merged into the combined list.
    async fn scan_many(&self, cidrs: &[Ipv4Network], request: &ScanRequest) -> Vec<DeviceRecord> {
        let workers = self.config.subnet_workers.min(cidrs.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        let scans = cidrs.iter().map(|cidr| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await;
                self.base_scan(*cidr, request).await
            }
        });

        let mut index = DeviceIndex::default();
        for devices in join_all(scans).await {
            for device in devices {
                index.insert_if_absent(device);
            }
        }

        let devices = index.into_records();
        if request.deep {
            let batch = self.enrich().await;
            self.apply_enrichment(devices, &batch, request.include_offline)
        } else {
            devices
        }
    }

    /// Full pipeline for one subnet
    pub async fn scan_cidr(&self, cidr: Ipv4Network, request: &ScanRequest) -> Vec<DeviceRecord> {
        let devices = self.base_scan(cidr, request).await;
        if request.deep {
            let batch = self.enrich().await;
            self.apply_enrichment(devices, &batch, request.include_offline)
        } else {
            devices
        }
    }

    /// Backend chain, naming, neighbor MACs and vendors
    async fn base_scan(&self, cidr: Ipv4Network, request: &ScanRequest) -> Vec<DeviceRecord> {
        let found = self.probe(cidr, request).await;
        let mut devices = self.normalize(found).await;

        let neighbors = arp_neighbors(self.platform.as_ref(), self.ip_timeout()).await;
        fill_neighbor_macs(&mut devices, &neighbors);
        fill_vendors(&mut devices, self.oui());
        devices
    }

    fn apply_enrichment(
        &self,
        devices: Vec<DeviceRecord>,
        batch: &EnrichmentBatch,
        include_offline: bool,
    ) -> Vec<DeviceRecord> {
        if batch.is_empty() {
            debug!("Enrichment found nothing to merge");
            return devices;
        }
        let mut devices = merge(devices, batch, include_offline);
        fill_vendors(&mut devices, self.oui());
        devices
    }

    /// Walk the backend chain for `request.method` until one succeeds
    pub async fn probe(&self, cidr: Ipv4Network, request: &ScanRequest) -> Vec<PartialRecord> {
        for backend in request.method.chain() {
            match self.run_backend(*backend, cidr, request).await {
                ProbeOutcome::Success(records) => {
                    info!("{} on {} found {} hosts", backend, cidr, records.len());
                    return records;
                }
                ProbeOutcome::Unavailable => debug!("{} not installed, falling through", backend),
                ProbeOutcome::Failed(reason) => warn!("{} failed on {}: {}", backend, cidr, reason),
            }
        }
        Vec::new()
    }

    async fn run_backend(&self, backend: Backend, cidr: Ipv4Network, request: &ScanRequest) -> ProbeOutcome {
        let platform = self.platform.as_ref();
        match backend {
            Backend::Layer2 => {
                run_layer2(platform, cidr, Duration::from_secs(self.config.arp_scan_timeout_secs)).await
            }
            Backend::ActiveDiscovery => {
                run_active_discovery(platform, cidr, Duration::from_secs(self.config.nmap_timeout_secs)).await
            }
            Backend::PingSweep => {
                if platform.locate(backend.program()).is_none() {
                    warn!("ping is not installed; every host will look silent");
                }
                let options = SweepOptions {
                    timeout_per_host: request.timeout_per_host,
                    workers: self.config.ping_workers,
                    max_hosts: self.config.max_sweep_hosts,
                    include_offline: request.include_offline,
                };
                ProbeOutcome::Success(ping::sweep(platform, cidr, &options).await)
            }
        }
    }

    /// Turn backend records into devices; unnamed hosts get reverse DNS or
    /// their IP. Duplicate IPs keep the first record.
    pub async fn normalize(&self, records: Vec<PartialRecord>) -> Vec<DeviceRecord> {
        let semaphore = Arc::new(Semaphore::new(self.config.ping_workers.max(1)));
        let dns_timeout = self.config.dns_timeout();

        let lookups = records.into_iter().map(|mut record| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let ip = record.ip?;
                if record.name.is_none() {
                    let _permit = semaphore.acquire().await;
                    record.name = timeout(dns_timeout, self.platform.reverse_dns(ip))
                        .await
                        .unwrap_or_else(|_| {
                            debug!("Reverse lookup for {} exceeded {:?}", ip, dns_timeout);
                            None
                        });
                }
                record.into_record()
            }
        });

        let devices: Vec<DeviceRecord> = join_all(lookups).await.into_iter().flatten().collect();
        DeviceIndex::from_records(devices).into_records()
    }

    /// SSDP, mDNS and DHCP leases, run concurrently
    pub async fn enrich(&self) -> EnrichmentBatch {
        let (ssdp, mdns, leases) = tokio::join!(
            discover_ssdp_devices(self.config.ssdp_window()),
            discover_mdns_devices(self.mdns.as_ref(), self.config.mdns_window()),
            self.dhcp_leases(),
        );

        debug!(
            "Enrichment: {} ssdp, {} mdns, {} leases",
            ssdp.len(),
            mdns.len(),
            leases.len()
        );
        EnrichmentBatch {
            ssdp,
            mdns,
            leases: leases.iter().map(DhcpLease::to_partial).collect(),
        }
    }

    pub async fn dhcp_leases(&self) -> Vec<DhcpLease> {
        discover_dhcp_leases(&self.config.dnsmasq_leases, &self.config.dhcpd_leases).await
    }

    /// Stations associated with local access points
    pub async fn discover_wifi_stations(&self) -> Vec<WifiStation> {
        let (neighbors, leases) = tokio::join!(
            arp_neighbors(self.platform.as_ref(), self.ip_timeout()),
            self.dhcp_leases(),
        );
        discover_wifi_stations(
            self.platform.as_ref(),
            &neighbors,
            &leases,
            Duration::from_secs(self.config.iw_timeout_secs),
        )
        .await
    }

    fn ip_timeout(&self) -> Duration {
        Duration::from_secs(self.config.ip_timeout_secs)
    }

    fn resolve_limits(&self) -> ResolveLimits {
        ResolveLimits {
            ip: self.ip_timeout(),
            dns: self.config.dns_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ScanMethod;
    use crate::enrichment::NullBrowser;
    use crate::platform::CommandOutput;
    use crate::{Result, ScanError};
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Only `ping` exists; hosts whose last octet is even answer
    #[derive(Default)]
    struct EvenHostsPing {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Platform for EvenHostsPing {
        fn locate(&self, program: &str) -> Option<PathBuf> {
            (program == "ping").then(|| PathBuf::from("/bin/ping"))
        }

        async fn run(&self, program: &str, args: &[String], _limit: Duration) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(program.to_string());
            if program != "ping" {
                return Err(ScanError::ToolUnavailable(program.to_string()));
            }
            let ip: Ipv4Addr = args.last().unwrap().parse().unwrap();
            Ok(CommandOutput {
                success: ip.octets()[3] % 2 == 0,
                ..Default::default()
            })
        }

        async fn reverse_dns(&self, ip: Ipv4Addr) -> Option<String> {
            (ip.octets()[3] == 2).then(|| "gateway.lan".to_string())
        }

        async fn hostname_address(&self) -> Option<Ipv4Addr> {
            None
        }
    }

    fn engine(platform: Arc<dyn Platform>) -> ScanEngine {
        let mut config = ScanConfig::default();
        config.dnsmasq_leases = PathBuf::from("/nonexistent/dnsmasq.leases");
        config.dhcpd_leases = PathBuf::from("/nonexistent/dhcpd.leases");
        ScanEngine::with_platform(config, platform, Arc::new(NullBrowser))
    }

    fn request(cidr: &str, include_offline: bool) -> ScanRequest {
        ScanRequest {
            subnet: Some(SubnetSpec::Cidr(cidr.parse().unwrap())),
            method: ScanMethod::Auto,
            include_offline,
            deep: false,
            timeout_per_host: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_auto_falls_through_to_ping() {
        let platform = Arc::new(EvenHostsPing::default());
        let engine = engine(platform.clone());

        let devices = engine.scan(&request("192.0.2.0/29", false)).await;
        let ips: Vec<String> = devices.iter().map(|d| d.ip.to_string()).collect();
        assert_eq!(ips, vec!["192.0.2.2", "192.0.2.4", "192.0.2.6"]);
        assert_eq!(devices[0].name, "gateway.lan");
        assert_eq!(devices[1].name, "192.0.2.4");

        let calls = platform.calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c == "arp-scan" || c == "nmap"));
    }

    #[tokio::test]
    async fn test_include_offline_keeps_every_host() {
        let engine = engine(Arc::new(EvenHostsPing::default()));
        let devices = engine.scan(&request("192.0.2.0/29", true)).await;
        assert_eq!(devices.len(), 6);
        assert_eq!(devices.iter().filter(|d| d.is_online()).count(), 3);
        assert!(devices.iter().filter(|d| !d.is_online()).all(|d| d.name == d.ip.to_string()));
    }

    #[tokio::test]
    async fn test_no_subnet_is_reported() {
        let engine = engine(Arc::new(EvenHostsPing::default()));
        let mut req = request("192.0.2.0/29", false);
        req.subnet = None;
        let report = engine.scan_report(&req).await;
        assert!(report.no_subnet());
        assert!(report.devices.is_empty());
    }
}
