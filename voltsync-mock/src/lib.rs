use std::sync::Arc;

use crate::settings::Settings;

mod command;
mod device;
pub mod settings;
mod simulate;

pub use command::MockDeviceConfig;
pub use device::{MockDevice, MockDeviceHandle};

/// Bring up one simulated battery per configured entry and serve until
/// interrupted.
pub async fn run(settings: &Arc<Settings>) {
    let mut fleet = Vec::new();

    for device in &settings.devices {
        let config = MockDeviceConfig {
            model: device.model.clone(),
            firmware: device.firmware,
            wifi_mac: device.wifi_mac.clone(),
            ble_mac: device.ble_mac.clone(),
            wifi_name: device.wifi_name.clone(),
            soc: device.soc,
            rated_capacity: device.rated_capacity,
            ..MockDeviceConfig::default()
        };

        match MockDevice::spawn(config, &format!("0.0.0.0:{}", device.port)).await {
            Ok(handle) => {
                tracing::info!(
                    model = %device.model,
                    firmware = device.firmware,
                    addr = %handle.addr(),
                    "Simulated device online"
                );
                fleet.push(handle);
            }
            Err(err) => {
                tracing::error!(model = %device.model, "Failed to start simulated device: {err}");
            }
        }
    }

    if fleet.is_empty() {
        tracing::error!("No simulated devices started, exiting");
        return;
    }

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(count = fleet.len(), "Shutting down simulated fleet");
}
