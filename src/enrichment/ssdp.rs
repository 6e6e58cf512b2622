//! SSDP (UPnP) multicast discovery

use crate::device::{DeviceKind, DeviceStatus, PartialRecord};
use crate::{Result, ScanError};
use log::{debug, warn};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

pub const SSDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

/// Key under which the response status line is stored
pub const STATUS_KEY: &str = "_STATUS";

const M_SEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 2\r\n\
ST: ssdp:all\r\n\r\n";

/// Header block of one response. Header names are upper-cased and the
/// first line is kept under [`STATUS_KEY`].
pub fn parse_ssdp_response(data: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(data);
    let mut headers = HashMap::new();

    for (i, line) in text.split("\r\n").enumerate() {
        if i == 0 {
            headers.insert(STATUS_KEY.to_string(), line.trim().to_string());
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_uppercase(), value.trim().to_string());
        }
    }

    headers
}

/// Display name: SERVER, else ST, else USN
pub fn display_name(headers: &HashMap<String, String>) -> Option<&str> {
    ["SERVER", "ST", "USN"]
        .iter()
        .filter_map(|key| headers.get(*key))
        .map(String::as_str)
        .find(|v| !v.is_empty())
}

/// Send M-SEARCH twice and collect replies for `window`; one record per
/// responding address. Socket errors yield an empty list.
pub async fn discover_ssdp_devices(window: Duration) -> Vec<PartialRecord> {
    match search(window).await {
        Ok(records) => {
            debug!("SSDP found {} devices", records.len());
            records
        }
        Err(e) => {
            warn!("SSDP discovery failed: {}", e);
            Vec::new()
        }
    }
}

async fn search(window: Duration) -> Result<Vec<PartialRecord>> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| ScanError::NetworkError(format!("Cannot bind SSDP socket: {}", e)))?;
    socket.set_multicast_ttl_v4(2)?;

    let group = SocketAddrV4::new(SSDP_GROUP, SSDP_PORT);
    for _ in 0..2 {
        if let Err(e) = socket.send_to(M_SEARCH.as_bytes(), group).await {
            debug!("SSDP send failed: {}", e);
        }
    }

    let deadline = Instant::now() + window;
    let mut order: Vec<Ipv4Addr> = Vec::new();
    let mut devices: HashMap<Ipv4Addr, PartialRecord> = HashMap::new();
    let mut buf = vec![0u8; 65_535];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, from) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                debug!("SSDP receive failed: {}", e);
                break;
            }
            Err(_) => break,
        };

        let SocketAddr::V4(from) = from else { continue };
        let headers = parse_ssdp_response(&buf[..len]);
        if headers.len() <= 1 {
            continue;
        }

        let ip = *from.ip();
        let record = PartialRecord::new(ip)
            .name(display_name(&headers).unwrap_or_default())
            .status(DeviceStatus::Online)
            .kind(DeviceKind::Ssdp);
        if devices.insert(ip, record).is_none() {
            order.push(ip);
        }
    }

    Ok(order.into_iter().filter_map(|ip| devices.remove(&ip)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=1800\r\n\
location: http://192.168.1.1:49152/rootDesc.xml\r\n\
server: Linux/5.4 UPnP/1.1 MiniUPnPd/2.2\r\n\
ST: upnp:rootdevice\r\n\
USN: uuid:1234::upnp:rootdevice\r\n\r\n";

    #[test]
    fn test_parse_ssdp_response() {
        let headers = parse_ssdp_response(RESPONSE);
        assert_eq!(headers[STATUS_KEY], "HTTP/1.1 200 OK");
        assert_eq!(headers["LOCATION"], "http://192.168.1.1:49152/rootDesc.xml");
        assert_eq!(headers["ST"], "upnp:rootdevice");
        assert_eq!(display_name(&headers), Some("Linux/5.4 UPnP/1.1 MiniUPnPd/2.2"));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let headers = parse_ssdp_response(b"HTTP/1.1 200 OK\r\nUSN: uuid:abcd\r\n\r\n");
        assert_eq!(display_name(&headers), Some("uuid:abcd"));

        let headers = parse_ssdp_response(b"HTTP/1.1 200 OK\r\nEXT:\r\n\r\n");
        assert_eq!(display_name(&headers), None);
    }

    #[test]
    fn test_parse_garbage_does_not_panic() {
        let headers = parse_ssdp_response(&[0xff, 0xfe, b'\r', b'\n', b'x']);
        assert_eq!(headers.len(), 1);
    }
}
