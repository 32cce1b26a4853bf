use std::error::Error;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub model: String,
    pub firmware: u32,
    pub wifi_mac: String,
    pub ble_mac: String,
    pub wifi_name: String,
    pub port: u16,
    #[serde(default = "default_soc")]
    pub soc: f64,
    #[serde(default = "default_rated_capacity")]
    pub rated_capacity: f64,
}

fn default_soc() -> f64 {
    80.0
}

fn default_rated_capacity() -> f64 {
    2560.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub devices: Vec<Device>,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let settings = toml::from_str(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../",
            "configs/mock.toml"
        )))?;

        Ok(settings)
    }
}
