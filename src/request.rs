//! Scan request normalization and response shapes

use crate::config::{parse_bool, ScanConfig};
use crate::device::DeviceRecord;
use crate::discovery::ScanMethod;
use crate::{Result, ScanError};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What to sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetSpec {
    Cidr(Ipv4Network),
    /// Every subnet found on local interfaces
    All,
}

impl FromStr for SubnetSpec {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(SubnetSpec::All);
        }
        let net: Ipv4Network = s.parse()?;
        Ipv4Network::new(net.network(), net.prefix())
            .map(SubnetSpec::Cidr)
            .map_err(ScanError::from)
    }
}

impl fmt::Display for SubnetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetSpec::Cidr(net) => write!(f, "{}", net),
            SubnetSpec::All => f.write_str("all"),
        }
    }
}

/// A fully resolved scan request
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub subnet: Option<SubnetSpec>,
    pub method: ScanMethod,
    pub include_offline: bool,
    pub deep: bool,
    pub timeout_per_host: Duration,
}

impl ScanRequest {
    /// Request with every option taken from configuration
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            subnet: None,
            method: config.default_method,
            include_offline: config.include_offline_default,
            deep: config.deep_default,
            timeout_per_host: config.ping_timeout(),
        }
    }

    /// Build from query-style parameters (`subnet`, `method`,
    /// `include_offline`, `deep`, `timeout`); absent keys take config
    /// defaults. A bad subnet, method or timeout is an error.
    pub fn from_query(params: &HashMap<String, String>, defaults: &ScanConfig) -> Result<Self> {
        let mut request = Self::from_config(defaults);

        if let Some(subnet) = params.get("subnet").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            request.subnet = Some(subnet.parse()?);
        }
        if let Some(method) = params.get("method") {
            request.method = method.parse()?;
        }
        if let Some(value) = params.get("include_offline") {
            request.include_offline = parse_bool(value);
        }
        if let Some(value) = params.get("deep") {
            request.deep = parse_bool(value);
        }
        if let Some(value) = params.get("timeout") {
            let secs: f64 = value
                .trim()
                .parse()
                .map_err(|_| ScanError::InvalidTarget(format!("Invalid timeout: {}", value)))?;
            let millis = (secs * 1000.0).round();
            if !millis.is_finite() || millis < 1.0 {
                return Err(ScanError::InvalidTarget(format!("Timeout must be positive: {}", value)));
            }
            request.timeout_per_host = Duration::from_millis(millis as u64);
        }

        Ok(request)
    }

    /// Query-parameter view, as stored in history
    pub fn to_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(subnet) = &self.subnet {
            params.insert("subnet".to_string(), subnet.to_string());
        }
        params.insert("method".to_string(), self.method.to_string());
        params.insert("include_offline".to_string(), self.include_offline.to_string());
        params.insert("deep".to_string(), self.deep.to_string());
        params.insert("timeout".to_string(), self.timeout_per_host.as_secs_f64().to_string());
        params
    }
}

/// `{"devices": [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceRecord>,
}

/// `{"subnets": [...], "supports_all": true}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetsResponse {
    pub subnets: Vec<String>,
    pub supports_all: bool,
}

impl SubnetsResponse {
    pub fn new(subnets: &[Ipv4Network]) -> Self {
        Self {
            subnets: subnets.iter().map(|s| s.to_string()).collect(),
            supports_all: true,
        }
    }
}
