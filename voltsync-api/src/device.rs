use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::status::DeviceSummary;

/// A battery unit found on the LAN. The link address (WiFi MAC) is the
/// stable key; the network address and firmware may change between
/// discoveries of the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub model: String,
    pub link_addr: String,
    pub host: IpAddr,
    pub port: u16,
    pub firmware: u32,
    pub ble_mac: Option<String>,
    pub wifi_name: Option<String>,
}

impl DeviceIdentity {
    /// Build an identity from a discovery reply. Returns `None` when the
    /// payload carries no link address, since the record would have no key.
    pub fn from_discovery(summary: &DeviceSummary, source: SocketAddr) -> Option<Self> {
        let link_addr = summary.wifi_mac.clone()?;

        Some(Self {
            model: summary.device.clone().unwrap_or_else(|| "Unknown".to_string()),
            link_addr,
            host: source.ip(),
            port: source.port(),
            firmware: summary.ver.unwrap_or(0),
            ble_mac: summary.ble_mac.clone(),
            wifi_name: summary.wifi_name.clone(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Dual-input models (a `D` suffix on the model name) carry PV hardware
    /// and answer `PV.GetStatus`; the rest reject it.
    pub fn has_solar(&self) -> bool {
        self.model.trim_end().ends_with('D')
    }

    /// Fold a newer discovery of the same unit into this record. Identity
    /// fields stay put; the network address and firmware follow the device.
    pub fn refresh_from(&mut self, other: &DeviceIdentity) {
        debug_assert_eq!(self.link_addr, other.link_addr);
        self.host = other.host;
        self.port = other.port;
        self.firmware = other.firmware;
        self.model = other.model.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(mac: Option<&str>) -> DeviceSummary {
        DeviceSummary {
            device: Some("VS500D".to_string()),
            ver: Some(154),
            ble_mac: Some("112233445566".to_string()),
            wifi_mac: mac.map(str::to_string),
            wifi_name: Some("lab".to_string()),
            ip: None,
        }
    }

    #[test]
    fn identity_requires_link_address() {
        let source: SocketAddr = "192.168.1.50:30000".parse().unwrap();
        assert!(DeviceIdentity::from_discovery(&summary(None), source).is_none());

        let identity =
            DeviceIdentity::from_discovery(&summary(Some("AA:BB:CC:DD:EE:01")), source).unwrap();
        assert_eq!(identity.link_addr, "AA:BB:CC:DD:EE:01");
        assert_eq!(identity.addr(), source);
        assert!(identity.has_solar());
    }

    #[test]
    fn refresh_follows_network_address() {
        let first: SocketAddr = "192.168.1.50:30000".parse().unwrap();
        let second: SocketAddr = "192.168.1.99:30000".parse().unwrap();

        let mut identity =
            DeviceIdentity::from_discovery(&summary(Some("AA:BB:CC:DD:EE:01")), first).unwrap();
        let newer =
            DeviceIdentity::from_discovery(&summary(Some("AA:BB:CC:DD:EE:01")), second).unwrap();

        identity.refresh_from(&newer);
        assert_eq!(identity.host, second.ip());
    }
}
