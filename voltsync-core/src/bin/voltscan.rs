//! One-shot diagnostic sweep: discover every battery on the LAN, poll a
//! full snapshot from each, and print the normalized readings along with
//! the command statistics.

use std::sync::Arc;
use std::time::Duration;

use voltsync_core::configs::Settings;
use voltsync_core::{
    CommandService, DevicePoller, DeviceSnapshot, DiscoveryService, PollPlan, UdpMultiplexer,
    aggregate,
};

#[tokio::main]
async fn main() {
    let settings = Arc::new(Settings::new().expect("Failed to load settings."));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            format!("{app_name}={level}").into()
        }))
        .init();

    let transport = UdpMultiplexer::bind(&settings.transport)
        .await
        .expect("Failed to bind the shared UDP socket.");
    let commands = Arc::new(CommandService::new(transport.clone()));
    let discovery = DiscoveryService::new(transport.clone());

    println!("Sweeping the LAN for battery units...");
    let devices = discovery
        .discover_with(
            Duration::from_secs(settings.discovery.window_secs),
            Duration::from_secs(settings.discovery.rebroadcast_secs),
        )
        .await
        .expect("Discovery sweep failed.");

    if devices.is_empty() {
        println!("No devices answered.");
        transport.shutdown();
        return;
    }

    let mut snapshots = Vec::new();
    for identity in devices {
        println!(
            "\n{} ({}) at {} — firmware v{}",
            identity.model,
            identity.link_addr,
            identity.addr(),
            identity.firmware
        );

        let plan = PollPlan::for_device(&identity);
        let mut poller = DevicePoller::new(identity, commands.clone(), plan);
        poller.poll_now().await;

        let snapshot = poller.snapshot();
        print_snapshot(&snapshot);
        snapshots.push(snapshot);
    }

    let fleet = aggregate(snapshots);
    println!("\nFleet ({} devices, {} unavailable):", fleet.device_count, fleet.unavailable_count);
    println!("  total battery power  {:>8.1} W", fleet.total_battery_power);
    println!("  total solar power    {:>8.1} W", fleet.total_solar_power);
    if let Some(average_soc) = fleet.average_soc {
        println!("  average SOC          {average_soc:>8.1} %");
    }
    if let Some(activity) = fleet.combined_activity {
        println!("  combined state       {activity:>8}");
    }

    transport.shutdown();
}

fn print_snapshot(snapshot: &DeviceSnapshot) {
    if let Some(section) = &snapshot.es {
        let es = &section.data;
        if let Some(power) = es.bat_power {
            println!("  battery power        {power:>8.1} W");
        }
        if let Some(power) = es.pv_power {
            println!("  solar power          {power:>8.1} W");
        }
        if let Some(power) = es.ongrid_power {
            println!("  grid power           {power:>8.1} W");
        }
    }

    if let Some(section) = &snapshot.battery {
        let battery = &section.data;
        if let Some(soc) = battery.soc {
            println!("  state of charge      {soc:>8.1} %");
        }
        if let Some(temp) = battery.bat_temp {
            println!("  temperature          {temp:>8.1} C");
        }
        if let Some(capacity) = battery.bat_capacity {
            println!("  remaining capacity   {capacity:>8.1} Wh");
        }
    }

    if let Some(activity) = snapshot.derived.activity {
        println!("  state                {activity:>8}");
    }
    if let Some(headroom) = snapshot.derived.available_capacity {
        println!("  available capacity   {headroom:>8.1} Wh");
    }

    let stats = &snapshot.stats;
    println!(
        "  commands: {} attempts, {} ok, {} timeouts{}",
        stats.total_attempts,
        stats.total_success,
        stats.total_timeouts,
        stats
            .last_latency
            .map(|latency| format!(", last latency {latency:?}"))
            .unwrap_or_default()
    );
}
