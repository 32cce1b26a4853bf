//! Typed result payloads for the status-query methods.
//!
//! Every field is optional: firmware revisions disagree about which fields
//! they report, and a partially understood reply is still worth merging.

use serde::{Deserialize, Serialize};

use crate::mode::OperatingMode;

/// `BLE.GetStatus` reports this when a phone is paired.
pub const BLE_STATE_CONNECT: &str = "connect";

/// `EM.GetStatus` `ct_state` value for an attached current transformer.
pub const CT_STATE_CONNECTED: i64 = 1;

/// `Device.GetInfo` result; also the discovery reply payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSummary {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub ver: Option<u32>,
    #[serde(default)]
    pub ble_mac: Option<String>,
    #[serde(default)]
    pub wifi_mac: Option<String>,
    #[serde(default)]
    pub wifi_name: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// `Wifi.GetStatus` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WifiStatus {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub sta_ip: Option<String>,
    #[serde(default)]
    pub sta_gate: Option<String>,
    #[serde(default)]
    pub sta_mask: Option<String>,
    #[serde(default)]
    pub sta_dns: Option<String>,
}

/// `BLE.GetStatus` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BleStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub ble_mac: Option<String>,
}

impl BleStatus {
    pub fn is_connected(&self) -> bool {
        self.state.as_deref() == Some(BLE_STATE_CONNECT)
    }
}

/// `Bat.GetStatus` result. `bat_temp` and `bat_capacity` arrive raw and must
/// go through [`crate::scaling`] before use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    #[serde(default)]
    pub soc: Option<f64>,
    #[serde(default)]
    pub charg_flag: Option<bool>,
    #[serde(default)]
    pub dischrg_flag: Option<bool>,
    #[serde(default)]
    pub bat_temp: Option<f64>,
    #[serde(default)]
    pub bat_capacity: Option<f64>,
    #[serde(default)]
    pub rated_capacity: Option<f64>,
}

/// `ES.GetStatus` result: the realtime power/energy picture. `bat_power` is
/// signed (positive while charging) and raw; the energy counters are raw.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EsStatus {
    #[serde(default)]
    pub bat_soc: Option<f64>,
    #[serde(default)]
    pub bat_cap: Option<f64>,
    #[serde(default)]
    pub bat_power: Option<f64>,
    #[serde(default)]
    pub pv_power: Option<f64>,
    #[serde(default)]
    pub ongrid_power: Option<f64>,
    #[serde(default)]
    pub offgrid_power: Option<f64>,
    #[serde(default)]
    pub total_pv_energy: Option<f64>,
    #[serde(default)]
    pub total_grid_input_energy: Option<f64>,
    #[serde(default)]
    pub total_grid_output_energy: Option<f64>,
    #[serde(default)]
    pub total_load_energy: Option<f64>,
}

/// `EM.GetStatus` result: per-phase readings from the external meter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmStatus {
    #[serde(default)]
    pub ct_state: Option<i64>,
    #[serde(default)]
    pub a_power: Option<f64>,
    #[serde(default)]
    pub b_power: Option<f64>,
    #[serde(default)]
    pub c_power: Option<f64>,
    #[serde(default)]
    pub total_power: Option<f64>,
}

impl EmStatus {
    pub fn ct_connected(&self) -> bool {
        self.ct_state == Some(CT_STATE_CONNECTED)
    }
}

/// `PV.GetStatus` result (solar-capable models only).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PvStatus {
    #[serde(default)]
    pub pv_power: Option<f64>,
    #[serde(default)]
    pub pv_voltage: Option<f64>,
    #[serde(default)]
    pub pv_current: Option<f64>,
}

/// `ES.GetMode` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeStatus {
    #[serde(default)]
    pub mode: Option<OperatingMode>,
    #[serde(default)]
    pub ongrid_power: Option<f64>,
    #[serde(default)]
    pub offgrid_power: Option<f64>,
    #[serde(default)]
    pub bat_soc: Option<f64>,
}

/// `ES.SetMode` result; `set_result` false means the device refused the
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetModeResult {
    #[serde(default)]
    pub set_result: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn es_status_tolerates_missing_fields() {
        let status: EsStatus =
            serde_json::from_value(json!({ "bat_power": -120.0, "unknown_field": 1 })).unwrap();
        assert_eq!(status.bat_power, Some(-120.0));
        assert_eq!(status.ongrid_power, None);
    }

    #[test]
    fn ble_connectivity_matches_wire_value() {
        let status: BleStatus = serde_json::from_value(json!({ "state": "connect" })).unwrap();
        assert!(status.is_connected());
        let status: BleStatus = serde_json::from_value(json!({ "state": "disconnect" })).unwrap();
        assert!(!status.is_connected());
    }
}
