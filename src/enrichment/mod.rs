//! Best-effort enrichment sources
//!
//! Every source here swallows its own failures and returns an empty
//! contribution instead; none of them can abort a scan.

pub mod leases;
pub mod mdns;
pub mod neighbors;
pub mod oui;
pub mod ssdp;
pub mod wifi;

use crate::device::PartialRecord;
use std::fmt;

pub use leases::{discover_dhcp_leases, parse_dhcpd_leases, parse_dnsmasq_leases, DhcpLease};
pub use mdns::{detect_browser, discover_mdns_devices, MdnsBrowser, NullBrowser};
pub use neighbors::{arp_neighbors, parse_ip_neigh};
pub use oui::OuiTable;
pub use ssdp::{discover_ssdp_devices, parse_ssdp_response};
pub use wifi::{discover_wifi_stations, WifiStation};

/// Where an enrichment record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentSource {
    Ssdp,
    Mdns,
    DhcpLeases,
}

impl EnrichmentSource {
    /// Service replies are proof of life; a lease is not
    pub fn implies_online(&self) -> bool {
        !matches!(self, EnrichmentSource::DhcpLeases)
    }
}

impl fmt::Display for EnrichmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnrichmentSource::Ssdp => "ssdp",
            EnrichmentSource::Mdns => "mdns",
            EnrichmentSource::DhcpLeases => "dhcp-leases",
        };
        f.write_str(name)
    }
}

/// Enrichment output in merge order: SSDP, mDNS, then DHCP leases
#[derive(Debug, Clone, Default)]
pub struct EnrichmentBatch {
    pub ssdp: Vec<PartialRecord>,
    pub mdns: Vec<PartialRecord>,
    pub leases: Vec<PartialRecord>,
}

impl EnrichmentBatch {
    pub fn sources(&self) -> [(EnrichmentSource, &[PartialRecord]); 3] {
        [
            (EnrichmentSource::Ssdp, self.ssdp.as_slice()),
            (EnrichmentSource::Mdns, self.mdns.as_slice()),
            (EnrichmentSource::DhcpLeases, self.leases.as_slice()),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.ssdp.is_empty() && self.mdns.is_empty() && self.leases.is_empty()
    }
}
