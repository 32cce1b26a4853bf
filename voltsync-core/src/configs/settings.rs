use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Socket configuration. `port` is both the local bind port and the port
/// devices listen on; `broadcast_host` is the discovery target, overridable
/// for networks where the global broadcast is filtered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Transport {
    pub bind_host: String,
    pub port: u16,
    pub broadcast_host: String,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 30000,
            broadcast_host: "255.255.255.255".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Polling {
    pub base_interval_secs: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            base_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Discovery {
    pub window_secs: u64,
    pub rebroadcast_secs: u64,
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            window_secs: 9,
            rebroadcast_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logger {
    pub level: String,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transport: Transport,
    pub polling: Polling,
    pub discovery: Discovery,
    pub logger: Logger,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());

        Config::builder()
            .add_source(File::with_name("configs/default").required(false))
            .add_source(File::with_name(&format!("configs/{run_mode}")).required(false))
            .add_source(Environment::with_prefix("VOLTSYNC").separator("__"))
            .build()?
            .try_deserialize()
    }
}
