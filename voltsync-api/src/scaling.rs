//! Firmware-aware field scaling.
//!
//! Firmware 154 changed the fixed-point encoding of several fields; older
//! revisions ship the same quantities at 10x the divisor. This table is the
//! single authority on those divisors: the polling service, the diagnostic
//! tooling and the device simulator all consult it rather than carrying
//! their own constants.

use crate::status::{BatteryStatus, EsStatus};

/// Firmware revision where the field encodings changed.
pub const FIRMWARE_THRESHOLD: u32 = 154;

const LEGACY_DIVISORS: &[(&str, f64)] = &[
    ("bat_temp", 10.0),
    ("bat_capacity", 100.0),
    ("bat_power", 10.0),
    ("total_grid_input_energy", 100.0),
    ("total_grid_output_energy", 100.0),
    ("total_load_energy", 100.0),
];

const CURRENT_DIVISORS: &[(&str, f64)] = &[
    ("bat_temp", 1.0),
    ("bat_capacity", 1000.0),
    ("bat_power", 1.0),
    ("total_grid_input_energy", 10.0),
    ("total_grid_output_energy", 10.0),
    ("total_load_energy", 10.0),
];

/// Divisor for a field under the given firmware; 1.0 for unscaled fields.
pub fn divisor(field: &str, firmware: u32) -> f64 {
    let table = if firmware >= FIRMWARE_THRESHOLD {
        CURRENT_DIVISORS
    } else {
        LEGACY_DIVISORS
    };

    table
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, divisor)| *divisor)
        .unwrap_or(1.0)
}

/// Rescale a raw wire value into its firmware-independent unit.
pub fn normalize(field: &str, raw: f64, firmware: u32) -> f64 {
    raw / divisor(field, firmware)
}

/// Apply the table to a freshly decoded `ES.GetStatus` payload in place.
pub fn scale_es_status(status: &mut EsStatus, firmware: u32) {
    if let Some(raw) = status.bat_power {
        status.bat_power = Some(normalize("bat_power", raw, firmware));
    }
    if let Some(raw) = status.total_grid_input_energy {
        status.total_grid_input_energy = Some(normalize("total_grid_input_energy", raw, firmware));
    }
    if let Some(raw) = status.total_grid_output_energy {
        status.total_grid_output_energy =
            Some(normalize("total_grid_output_energy", raw, firmware));
    }
    if let Some(raw) = status.total_load_energy {
        status.total_load_energy = Some(normalize("total_load_energy", raw, firmware));
    }
}

/// Apply the table to a freshly decoded `Bat.GetStatus` payload in place.
pub fn scale_battery_status(status: &mut BatteryStatus, firmware: u32) {
    if let Some(raw) = status.bat_temp {
        status.bat_temp = Some(normalize("bat_temp", raw, firmware));
    }
    if let Some(raw) = status.bat_capacity {
        status.bat_capacity = Some(normalize("bat_capacity", raw, firmware));
    }
}
