//! Remote method names understood by the battery firmware.

use serde_json::{Value, json};

pub const GET_DEVICE: &str = "Device.GetInfo";
pub const WIFI_STATUS: &str = "Wifi.GetStatus";
pub const BLE_STATUS: &str = "BLE.GetStatus";
pub const BATTERY_STATUS: &str = "Bat.GetStatus";
pub const PV_STATUS: &str = "PV.GetStatus";
pub const ES_STATUS: &str = "ES.GetStatus";
pub const ES_MODE: &str = "ES.GetMode";
pub const ES_SET_MODE: &str = "ES.SetMode";
pub const EM_STATUS: &str = "EM.GetStatus";

/// Fixed correlation id shared by every discovery broadcast, so devices on
/// the LAN can be told apart from unicast command traffic.
pub const DISCOVERY_ID: &str = "voltsync-discover";

pub fn discovery_params() -> Value {
    json!({ "ble_mac": "0" })
}
