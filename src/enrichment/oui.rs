//! MAC prefix to vendor lookup

use crate::device::{canonical_mac, normalize_mac, oui_prefix};
use crate::{Result, ScanError};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const PACKAGED_TABLE: &str = include_str!("../../data/oui_prefixes.json");

/// Immutable `AA:BB:CC` -> vendor table
#[derive(Debug, Clone, Default)]
pub struct OuiTable {
    prefixes: HashMap<String, String>,
}

impl OuiTable {
    /// Parse a JSON object of prefix -> vendor. Keys are normalized; keys that
    /// are not three hex octets are ignored.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_str(text)?;
        let prefixes = raw
            .into_iter()
            .filter_map(|(prefix, vendor)| {
                let key = normalize_mac(&prefix);
                canonical_mac(&format!("{}:00:00:00", key)).map(|_| (key, vendor))
            })
            .collect();
        Ok(Self { prefixes })
    }

    /// The table shipped with the crate
    pub fn packaged() -> Self {
        Self::from_json(PACKAGED_TABLE).unwrap_or_else(|e| {
            warn!("Packaged OUI table is unreadable: {}", e);
            Self::default()
        })
    }

    /// Load `path` if given and readable, else the packaged table
    pub fn load(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            match fs::read_to_string(path)
                .map_err(ScanError::from)
                .and_then(|text| Self::from_json(&text))
            {
                Ok(table) => {
                    debug!("Loaded {} OUI prefixes from {}", table.len(), path.display());
                    return table;
                }
                Err(e) => warn!("Ignoring OUI table {}: {}", path.display(), e),
            }
        }
        Self::packaged()
    }

    /// Vendor for a MAC in any accepted form; `None` for unknown prefixes and
    /// malformed input
    pub fn vendor_from_mac(&self, mac: &str) -> Option<&str> {
        let prefix = oui_prefix(mac)?;
        self.prefixes.get(&prefix).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packaged_table_lookups() {
        let table = OuiTable::packaged();
        assert!(!table.is_empty());
        assert_eq!(table.vendor_from_mac("00:50:56:12:34:56"), Some("VMware, Inc."));
        assert_eq!(table.vendor_from_mac("b8-27-eb-00-11-22"), Some("Raspberry Pi Foundation"));
        assert_eq!(table.vendor_from_mac("FE:FF:FF:00:00:01"), None);
    }

    #[test]
    fn test_malformed_mac_has_no_vendor() {
        let table = OuiTable::packaged();
        assert_eq!(table.vendor_from_mac(""), None);
        assert_eq!(table.vendor_from_mac("00:50:56"), None);
        assert_eq!(table.vendor_from_mac("00:50:56:zz:00:00"), None);
    }

    #[test]
    fn test_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oui.json");
        fs::write(&path, r#"{"aa-bb-cc": "Lab Gear", "bogus": "x"}"#).unwrap();

        let table = OuiTable::load(Some(&path));
        assert_eq!(table.len(), 1);
        assert_eq!(table.vendor_from_mac("AA:BB:CC:01:02:03"), Some("Lab Gear"));
    }

    #[test]
    fn test_unreadable_override_falls_back() {
        let table = OuiTable::load(Some(Path::new("/nonexistent/oui.json")));
        assert_eq!(table.vendor_from_mac("00:50:56:00:00:01"), Some("VMware, Inc."));
    }

    proptest! {
        #[test]
        fn known_prefix_round_trips(tail in proptest::array::uniform3(any::<u8>()), hyphen in any::<bool>()) {
            let table = OuiTable::from_json(r#"{"DC:A6:32": "Pi"}"#).unwrap();
            let sep = if hyphen { "-" } else { ":" };
            let mac = format!("dc{sep}a6{sep}32{sep}{:02x}{sep}{:02x}{sep}{:02x}", tail[0], tail[1], tail[2]);
            prop_assert_eq!(table.vendor_from_mac(&mac), Some("Pi"));
        }

        #[test]
        fn lookup_never_panics(s in "[ -~]{0,32}") {
            let table = OuiTable::packaged();
            let _ = table.vendor_from_mac(&s);
        }
    }
}
