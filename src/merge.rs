//! Folding enrichment records into the scan's device list

use crate::device::{DeviceKind, DeviceRecord, DeviceStatus, PartialRecord};
use crate::enrichment::{EnrichmentBatch, EnrichmentSource, OuiTable};
use log::debug;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// IP-keyed device list that keeps insertion order
#[derive(Debug, Default)]
pub struct DeviceIndex {
    devices: Vec<DeviceRecord>,
    by_ip: HashMap<Ipv4Addr, usize>,
}

impl DeviceIndex {
    /// Build from records; a repeated IP keeps its first record
    pub fn from_records(records: Vec<DeviceRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert_if_absent(record);
        }
        index
    }

    /// Insert unless the IP is already present. Returns whether it was added.
    pub fn insert_if_absent(&mut self, record: DeviceRecord) -> bool {
        if self.by_ip.contains_key(&record.ip) {
            return false;
        }
        self.by_ip.insert(record.ip, self.devices.len());
        self.devices.push(record);
        true
    }

    pub fn get_mut(&mut self, ip: &Ipv4Addr) -> Option<&mut DeviceRecord> {
        let slot = *self.by_ip.get(ip)?;
        self.devices.get_mut(slot)
    }

    pub fn into_records(self) -> Vec<DeviceRecord> {
        self.devices
    }
}

/// Copy fields from `extra` into `record` where `record` has nothing yet.
///
/// A host nobody could name carries its IP as the name. That name counts as
/// unset here and is replaced by any name `extra` offers; every other name
/// is kept.
pub fn fill_missing(record: &mut DeviceRecord, extra: &PartialRecord) {
    if let Some(name) = extra.name.as_deref() {
        if record.name.trim().is_empty() || record.name == record.ip.to_string() {
            record.name = name.to_string();
        }
    }
    if record.kind == DeviceKind::Unknown {
        if let Some(kind) = extra.kind.filter(|k| *k != DeviceKind::Unknown) {
            record.kind = kind;
        }
    }
    if record.mac.is_none() {
        record.mac = extra.mac.clone();
    }
    if record.vendor.is_none() {
        record.vendor = extra.vendor.clone();
    }
}

/// Merge deep-discovery results into `base`.
///
/// Sources are applied SSDP, mDNS, then DHCP leases. Known IPs only get
/// their empty fields filled. Unknown IPs from SSDP/mDNS are added as online;
/// unknown IPs from leases are added as offline, and only with
/// `include_offline`.
pub fn merge(base: Vec<DeviceRecord>, batch: &EnrichmentBatch, include_offline: bool) -> Vec<DeviceRecord> {
    let mut index = DeviceIndex::from_records(base);

    for (source, records) in batch.sources() {
        let mut added = 0usize;
        for extra in records {
            let Some(ip) = extra.ip else { continue };

            if let Some(existing) = index.get_mut(&ip) {
                fill_missing(existing, extra);
                continue;
            }

            let status = if source.implies_online() {
                DeviceStatus::Online
            } else if include_offline {
                DeviceStatus::Offline
            } else {
                continue;
            };

            let mut fresh = extra.clone();
            fresh.status = Some(status);
            if source == EnrichmentSource::DhcpLeases {
                fresh.kind = Some(DeviceKind::Unknown);
            }
            if let Some(record) = fresh.into_record() {
                if index.insert_if_absent(record) {
                    added += 1;
                }
            }
        }
        debug!("{} contributed {} new hosts", source, added);
    }

    index.into_records()
}

/// Attach MACs from the neighbor table where a record has none
pub fn fill_neighbor_macs(devices: &mut [DeviceRecord], neighbors: &HashMap<Ipv4Addr, String>) {
    for device in devices.iter_mut().filter(|d| d.mac.is_none()) {
        device.mac = neighbors.get(&device.ip).cloned();
    }
}

/// Derive vendors from MACs where a record has none
pub fn fill_vendors(devices: &mut [DeviceRecord], oui: &OuiTable) {
    for device in devices.iter_mut().filter(|d| d.vendor.is_none()) {
        device.vendor = device
            .mac
            .as_deref()
            .and_then(|mac| oui.vendor_from_mac(mac))
            .map(str::to_string);
    }
}
