//! lanscan - local network device discovery
//!
//! Finds devices on the IPv4 subnets attached to this host using whatever
//! tools are installed (arp-scan, nmap, ping), then enriches the results with
//! ARP neighbors, DHCP leases, SSDP and mDNS announcements and an OUI vendor
//! table.

pub mod config;
pub mod device;
pub mod discovery;
pub mod enrichment;
pub mod error;
pub mod history;
pub mod jobs;
pub mod merge;
pub mod output;
pub mod platform;
pub mod request;
pub mod tasks;

// Re-export commonly used types
pub use config::ScanConfig;
pub use device::{DeviceKind, DeviceRecord, DeviceStatus, PartialRecord};
pub use discovery::engine::ScanReport;
pub use discovery::{ScanEngine, ScanMethod};
pub use error::{ScanError, ScanResult};
pub use history::{HistoryEntry, HistoryLog};
pub use jobs::{JobRegistry, JobState, ScanJob};
pub use platform::{CommandOutput, Platform, SystemPlatform};
pub use request::{ScanRequest, SubnetSpec};

pub type Result<T> = std::result::Result<T, ScanError>;
