use std::collections::HashMap;

use serde_json::{Value, json};
use time::OffsetDateTime;

use voltsync_api::message::{CommandEnvelope, ResponseEnvelope};
use voltsync_api::method;
use voltsync_api::mode::{ManualSchedule, ModeConfig, OperatingMode};
use voltsync_api::scaling;

use crate::simulate;

/// Identity and behaviour knobs for one simulated unit.
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    pub model: String,
    pub firmware: u32,
    pub wifi_mac: String,
    pub ble_mac: String,
    pub wifi_name: String,
    pub soc: f64,
    pub rated_capacity: f64,
    /// Answer broadcast discovery probes.
    pub answer_discovery: bool,
    /// Pin the reported battery power instead of following the daily curve.
    pub fixed_battery_power: Option<f64>,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            model: "VS300".to_string(),
            firmware: 154,
            wifi_mac: "AA:BB:CC:DD:EE:01".to_string(),
            ble_mac: "112233445566".to_string(),
            wifi_name: "voltsync-lab".to_string(),
            soc: 80.0,
            rated_capacity: 2560.0,
            answer_discovery: true,
            fixed_battery_power: None,
        }
    }
}

impl MockDeviceConfig {
    fn has_solar(&self) -> bool {
        self.model.trim_end().ends_with('D')
    }
}

/// Mutable state behind one simulated unit, plus the counters the
/// integration tests poke at.
pub struct DeviceState {
    pub config: MockDeviceConfig,
    pub mode: OperatingMode,
    pub schedules: [Option<ManualSchedule>; ManualSchedule::MAX_SLOTS as usize],
    pub method_counts: HashMap<String, u64>,
    pub seen_ids: Vec<String>,
}

impl DeviceState {
    pub fn new(config: MockDeviceConfig) -> Self {
        Self {
            config,
            mode: OperatingMode::Auto,
            schedules: Default::default(),
            method_counts: HashMap::new(),
            seen_ids: Vec::new(),
        }
    }
}

/// Answer one request the way the firmware would. `None` means stay silent
/// (muted discovery).
pub fn respond(state: &mut DeviceState, request: &CommandEnvelope) -> Option<ResponseEnvelope> {
    *state
        .method_counts
        .entry(request.method.clone())
        .or_insert(0) += 1;
    state.seen_ids.push(request.id.clone());

    if request.id == method::DISCOVERY_ID && !state.config.answer_discovery {
        return None;
    }

    let day = simulate::day_fraction(OffsetDateTime::now_utc());
    let firmware = state.config.firmware;
    let raw = |field: &str, value: f64| (value * scaling::divisor(field, firmware)).round();

    let result: Value = match request.method.as_str() {
        method::GET_DEVICE => json!({
            "device": state.config.model,
            "ver": firmware,
            "ble_mac": state.config.ble_mac,
            "wifi_mac": state.config.wifi_mac,
            "wifi_name": state.config.wifi_name,
        }),
        method::WIFI_STATUS => json!({
            "ssid": state.config.wifi_name,
            "rssi": simulate::with_noise(-52.0, 2.0).round() as i64,
            "sta_ip": "0.0.0.0",
            "sta_gate": "0.0.0.0",
            "sta_mask": "255.255.255.0",
            "sta_dns": "0.0.0.0",
        }),
        method::BLE_STATUS => json!({
            "state": "disconnect",
            "ble_mac": state.config.ble_mac,
        }),
        method::BATTERY_STATUS => json!({
            "soc": state.config.soc,
            "charg_flag": true,
            "dischrg_flag": true,
            "bat_temp": raw("bat_temp", simulate::battery_temperature(day)),
            "bat_capacity": raw(
                "bat_capacity",
                state.config.rated_capacity * state.config.soc / 100.0,
            ),
            "rated_capacity": state.config.rated_capacity,
        }),
        method::ES_STATUS => {
            let battery_power = state
                .config
                .fixed_battery_power
                .unwrap_or_else(|| simulate::battery_power(day));
            let solar = if state.config.has_solar() {
                simulate::solar_power(day)
            } else {
                0.0
            };
            let load = simulate::household_load(day);

            json!({
                "bat_soc": state.config.soc,
                "bat_cap": state.config.rated_capacity,
                "bat_power": raw("bat_power", battery_power),
                "pv_power": solar.round(),
                "ongrid_power": (load - solar + battery_power).round(),
                "offgrid_power": 0,
                "total_pv_energy": 10_000,
                "total_grid_input_energy": raw("total_grid_input_energy", 8_000.0),
                "total_grid_output_energy": raw("total_grid_output_energy", 5_000.0),
                "total_load_energy": raw("total_load_energy", 12_000.0),
            })
        }
        method::EM_STATUS => {
            let load = simulate::household_load(day);
            let phase = (load / 3.0).round();
            json!({
                "ct_state": 1,
                "a_power": phase,
                "b_power": phase,
                "c_power": phase,
                "total_power": phase * 3.0,
            })
        }
        method::PV_STATUS => {
            if !state.config.has_solar() {
                return Some(ResponseEnvelope::failure(
                    request.id.clone(),
                    -32601,
                    "Method not found",
                ));
            }
            let solar = simulate::solar_power(day);
            json!({
                "pv_power": solar.round(),
                "pv_voltage": simulate::with_noise(40.0, 0.5),
                "pv_current": (solar / 40.0 * 10.0).round() / 10.0,
            })
        }
        method::ES_MODE => json!({
            "mode": state.mode,
            "ongrid_power": simulate::household_load(day).round(),
            "offgrid_power": 0,
            "bat_soc": state.config.soc,
        }),
        method::ES_SET_MODE => return Some(apply_mode_change(state, request)),
        _ => {
            return Some(ResponseEnvelope::failure(
                request.id.clone(),
                -32601,
                "Method not found",
            ));
        }
    };

    Some(ResponseEnvelope::success(request.id.clone(), result))
}

fn apply_mode_change(state: &mut DeviceState, request: &CommandEnvelope) -> ResponseEnvelope {
    let Some(config_value) = request.params.get("config").cloned() else {
        return ResponseEnvelope::success(request.id.clone(), json!({ "set_result": false }));
    };

    let parsed: Result<ModeConfig, _> = serde_json::from_value(config_value);
    let accepted = match parsed {
        Ok(config) if config.is_coherent() => {
            state.mode = config.mode;
            if let Some(schedule) = config.manual_cfg {
                let idx = schedule.time_num as usize;
                state.schedules[idx] = Some(schedule);
            }
            true
        }
        _ => false,
    };

    ResponseEnvelope::success(request.id.clone(), json!({ "set_result": accepted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method_name: &str, params: Option<Value>) -> CommandEnvelope {
        CommandEnvelope::new("voltsync-test0000", method_name, params)
    }

    #[test]
    fn legacy_firmware_reports_scaled_raw_values() {
        let mut state = DeviceState::new(MockDeviceConfig {
            firmware: 147,
            ..MockDeviceConfig::default()
        });

        let response = respond(&mut state, &request(method::BATTERY_STATUS, None)).unwrap();
        let result = response.result.unwrap();

        // Raw wire value is 10x the real temperature on pre-154 firmware.
        let raw_temp = result["bat_temp"].as_f64().unwrap();
        let real_temp = scaling::normalize("bat_temp", raw_temp, 147);
        assert!((15.0..40.0).contains(&real_temp), "temp {real_temp}");
        assert!(raw_temp >= 150.0, "raw {raw_temp}");
    }

    #[test]
    fn set_mode_rejects_incoherent_config() {
        let mut state = DeviceState::new(MockDeviceConfig::default());

        let bad_slot = json!({ "id": 0, "config": {
            "mode": "Manual",
            "manual_cfg": {
                "time_num": 10,
                "start_time": "00:00",
                "end_time": "23:59",
                "week_set": 127,
                "power": 0,
                "enable": 1
            }
        }});
        let response = respond(&mut state, &request(method::ES_SET_MODE, Some(bad_slot))).unwrap();
        assert_eq!(response.result.unwrap()["set_result"], false);
        assert_eq!(state.mode, OperatingMode::Auto);

        let good = json!({ "id": 0, "config": { "mode": "AI", "ai_cfg": { "enable": 1 } } });
        let response = respond(&mut state, &request(method::ES_SET_MODE, Some(good))).unwrap();
        assert_eq!(response.result.unwrap()["set_result"], true);
        assert_eq!(state.mode, OperatingMode::Ai);
    }

    #[test]
    fn muted_discovery_stays_silent_but_answers_unicast() {
        let mut state = DeviceState::new(MockDeviceConfig {
            answer_discovery: false,
            ..MockDeviceConfig::default()
        });

        let probe = CommandEnvelope::new(
            method::DISCOVERY_ID,
            method::GET_DEVICE,
            Some(method::discovery_params()),
        );
        assert!(respond(&mut state, &probe).is_none());

        let unicast = request(method::GET_DEVICE, None);
        assert!(respond(&mut state, &unicast).is_some());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut state = DeviceState::new(MockDeviceConfig::default());
        let response = respond(&mut state, &request("ES.NoSuchMethod", None)).unwrap();
        assert!(response.error.is_some());
        assert!(response.result.is_none());
    }
}
