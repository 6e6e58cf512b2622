//! mDNS / Bonjour service browsing

use crate::device::{DeviceKind, DeviceStatus, PartialRecord};
use async_trait::async_trait;
use log::{debug, info};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

/// Service type browsed during deep discovery
pub const HTTP_SERVICE: &str = "_http._tcp.local.";

/// Something that can browse mDNS services
#[async_trait]
pub trait MdnsBrowser: Send + Sync {
    /// One record per resolved IPv4 address seen within `window`
    async fn browse(&self, service_type: &str, window: Duration) -> Vec<PartialRecord>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Pick the real browser if the mDNS daemon starts, else the no-op one
pub fn detect_browser() -> Arc<dyn MdnsBrowser> {
    match ServiceDaemon::new() {
        Ok(daemon) => Arc::new(DaemonBrowser {
            daemon,
            browsing: Mutex::new(()),
        }),
        Err(e) => {
            info!("mDNS unavailable, skipping that source: {}", e);
            Arc::new(NullBrowser)
        }
    }
}

/// Browser backed by an `mdns-sd` daemon.
///
/// The daemon keeps one listener per service type, so browses run one at a
/// time; a second caller waits for the first window to close.
pub struct DaemonBrowser {
    daemon: ServiceDaemon,
    browsing: Mutex<()>,
}

#[async_trait]
impl MdnsBrowser for DaemonBrowser {
    async fn browse(&self, service_type: &str, window: Duration) -> Vec<PartialRecord> {
        let _browsing = self.browsing.lock().await;
        let receiver = match self.daemon.browse(service_type) {
            Ok(receiver) => receiver,
            Err(e) => {
                debug!("mDNS browse of {} failed: {}", service_type, e);
                return Vec::new();
            }
        };

        let deadline = Instant::now() + window;
        let mut order: Vec<Ipv4Addr> = Vec::new();
        let mut found: HashMap<Ipv4Addr, PartialRecord> = HashMap::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    let name = info.get_fullname().to_string();
                    for addr in info.get_addresses().iter().map(|scoped| scoped.to_ip_addr()) {
                        let IpAddr::V4(ip) = addr else { continue };
                        let record = PartialRecord::new(ip)
                            .name(name.clone())
                            .status(DeviceStatus::Online)
                            .kind(DeviceKind::Mdns);
                        if found.insert(ip, record).is_none() {
                            order.push(ip);
                        }
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        self.daemon.stop_browse(service_type).ok();
        debug!("mDNS browse of {} found {} addresses", service_type, order.len());
        order.into_iter().filter_map(|ip| found.remove(&ip)).collect()
    }
}

impl Drop for DaemonBrowser {
    fn drop(&mut self) {
        self.daemon.shutdown().ok();
    }
}

/// Stand-in when no mDNS capability exists
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBrowser;

#[async_trait]
impl MdnsBrowser for NullBrowser {
    async fn browse(&self, _service_type: &str, _window: Duration) -> Vec<PartialRecord> {
        Vec::new()
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Best-effort HTTP service browse
pub async fn discover_mdns_devices(browser: &dyn MdnsBrowser, window: Duration) -> Vec<PartialRecord> {
    if !browser.is_available() {
        return Vec::new();
    }
    browser.browse(HTTP_SERVICE, window).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_browser_is_empty() {
        let browser = NullBrowser;
        assert!(!browser.is_available());
        assert!(discover_mdns_devices(&browser, Duration::from_millis(10)).await.is_empty());
    }

    struct Scripted;

    #[async_trait]
    impl MdnsBrowser for Scripted {
        async fn browse(&self, service_type: &str, _window: Duration) -> Vec<PartialRecord> {
            assert_eq!(service_type, HTTP_SERVICE);
            vec![PartialRecord::new("192.0.2.50".parse().unwrap())
                .name("printer._http._tcp.local.")
                .kind(DeviceKind::Mdns)]
        }
    }

    #[tokio::test]
    async fn test_browses_http_services() {
        let records = discover_mdns_devices(&Scripted, Duration::from_millis(10)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, Some(DeviceKind::Mdns));
    }
}
