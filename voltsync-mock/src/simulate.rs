//! Telemetry curves for simulated battery units, parameterized on the
//! fraction of the day elapsed.

use rand_distr::{Distribution, Normal};
use time::OffsetDateTime;

const SECONDS_PER_DAY: f64 = 86_400.0;

// Daily profile anchors.
const SOLAR_START: f64 = 0.27;
const SOLAR_END: f64 = 0.79;
const EVENING_PEAK_START: f64 = 0.70;
const EVENING_PEAK_END: f64 = 0.95;

const MAX_SOLAR_W: f64 = 1_800.0;
const BASE_LOAD_W: f64 = 250.0;
const EVENING_LOAD_W: f64 = 900.0;

pub fn day_fraction(now: OffsetDateTime) -> f64 {
    let time_of_day = now.time();
    let seconds = time_of_day.hour() as f64 * 3600.0
        + time_of_day.minute() as f64 * 60.0
        + time_of_day.second() as f64;
    seconds / SECONDS_PER_DAY
}

/// Solar yield: a half-sine bell between sunrise and sunset, zero at night.
pub fn solar_power(day_fraction: f64) -> f64 {
    if day_fraction < SOLAR_START || day_fraction > SOLAR_END {
        return 0.0;
    }

    let progress = (day_fraction - SOLAR_START) / (SOLAR_END - SOLAR_START);
    (progress * std::f64::consts::PI).sin() * MAX_SOLAR_W
}

/// Household draw: flat base load with an evening bump.
pub fn household_load(day_fraction: f64) -> f64 {
    if day_fraction >= EVENING_PEAK_START && day_fraction <= EVENING_PEAK_END {
        let progress =
            (day_fraction - EVENING_PEAK_START) / (EVENING_PEAK_END - EVENING_PEAK_START);
        BASE_LOAD_W + (progress * std::f64::consts::PI).sin() * EVENING_LOAD_W
    } else {
        BASE_LOAD_W
    }
}

/// Battery power, positive while charging: the unit soaks up surplus solar
/// during the day and covers the evening peak.
pub fn battery_power(day_fraction: f64) -> f64 {
    let surplus = solar_power(day_fraction) - household_load(day_fraction);
    surplus.clamp(-1_200.0, 1_500.0)
}

/// Cell temperature drifts a few degrees around ambient with activity.
pub fn battery_temperature(day_fraction: f64) -> f64 {
    22.0 + (battery_power(day_fraction).abs() / 1_500.0) * 8.0
}

/// Gaussian measurement noise layered over a curve value.
pub fn with_noise(value: f64, std_dev: f64) -> f64 {
    match Normal::new(value, std_dev) {
        Ok(distribution) => distribution.sample(&mut rand::rng()),
        Err(_) => value,
    }
}
