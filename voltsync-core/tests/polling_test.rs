use std::sync::Arc;
use std::time::Duration;

use voltsync_api::method;
use voltsync_api::mode::{ManualSchedule, ModeConfig, OperatingMode};
use voltsync_core::{CommandError, CommandService, DevicePoller, PollPlan};
use voltsync_mock::{MockDevice, MockDeviceConfig, MockDeviceHandle};

mod common;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn poller_for(device: &MockDeviceHandle) -> DevicePoller {
    let identity = device.identity();
    let commands = Arc::new(CommandService::new(common::loopback_mux().await));
    let plan = PollPlan::for_device(&identity);

    DevicePoller::new(identity, commands, plan)
        .with_command_policy(Duration::from_secs(2), 1)
        .with_mode_retry(3, Duration::from_millis(50))
}

#[tokio::test]
async fn ten_ticks_follow_the_tier_cadence() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    let mut poller = poller_for(&device).await;

    for _ in 0..10 {
        poller.poll_tick().await;
    }

    assert_eq!(device.method_count(method::ES_STATUS), 10);
    assert_eq!(device.method_count(method::EM_STATUS), 10);
    assert_eq!(device.method_count(method::BATTERY_STATUS), 2);
    assert_eq!(device.method_count(method::ES_MODE), 2);
    assert_eq!(device.method_count(method::GET_DEVICE), 1);
    assert_eq!(device.method_count(method::WIFI_STATUS), 1);
    assert_eq!(device.method_count(method::BLE_STATUS), 1);
    // No solar hardware on this model, so the PV tier never fires.
    assert_eq!(device.method_count(method::PV_STATUS), 0);

    let snapshot = poller.snapshot();
    assert_eq!(snapshot.tick, 10);
    assert_eq!(snapshot.es.as_ref().unwrap().tick, 10);
    assert_eq!(snapshot.battery.as_ref().unwrap().tick, 10);
    assert_eq!(snapshot.device.as_ref().unwrap().tick, 10);
    assert!(snapshot.is_available());
}

#[tokio::test]
async fn failed_poll_keeps_the_cached_section() {
    let device = MockDevice::spawn(
        MockDeviceConfig {
            fixed_battery_power: Some(400.0),
            ..MockDeviceConfig::default()
        },
        "127.0.0.1:0",
    )
    .await
    .unwrap();
    let mut poller = poller_for(&device).await;

    poller.poll_tick().await;
    let first = poller.snapshot();
    assert_eq!(
        first.es.as_ref().unwrap().data.bat_power,
        Some(400.0)
    );
    assert_eq!(first.es.as_ref().unwrap().tick, 1);

    // The device goes dark; the next tick must not blank the cache.
    device.set_silent(true);
    let mut poller = poller.with_command_policy(Duration::from_millis(100), 1);
    poller.poll_tick().await;

    let second = poller.snapshot();
    assert_eq!(second.tick, 2);
    let es = second.es.as_ref().unwrap();
    assert_eq!(es.data.bat_power, Some(400.0));
    // The section's age is visible through its stale tick stamp.
    assert_eq!(es.tick, 1);
    assert!(second.stats.total_timeouts >= 2);
    // One recent success means the device still counts as available.
    assert!(second.is_available());
}

#[tokio::test]
async fn legacy_firmware_values_are_normalized_once() {
    let device = MockDevice::spawn(
        MockDeviceConfig {
            model: "VS500D".to_string(),
            firmware: 147,
            fixed_battery_power: Some(400.0),
            ..MockDeviceConfig::default()
        },
        "127.0.0.1:0",
    )
    .await
    .unwrap();
    let mut poller = poller_for(&device).await;

    for _ in 0..5 {
        poller.poll_tick().await;
    }

    let snapshot = poller.snapshot();

    // The wire carried 4000 (legacy 10x encoding); the snapshot holds watts.
    let es = &snapshot.es.as_ref().unwrap().data;
    assert_eq!(es.bat_power, Some(400.0));

    let battery = &snapshot.battery.as_ref().unwrap().data;
    let temp = battery.bat_temp.unwrap();
    assert!((15.0..40.0).contains(&temp), "temperature {temp}");

    // Solar-capable model, so the PV tier fired on tick 5.
    assert_eq!(device.method_count(method::PV_STATUS), 1);
    assert!(snapshot.pv.is_some());

    assert_eq!(
        snapshot.derived.activity,
        Some(voltsync_core::BatteryActivity::Charging)
    );
    assert_eq!(snapshot.derived.power_in, 400.0);
    assert_eq!(snapshot.derived.power_out, 0.0);
}

#[tokio::test]
async fn mode_change_round_trip_and_loud_rejection() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    let poller = poller_for(&device).await;

    poller
        .set_mode(&ModeConfig::default_for(OperatingMode::Manual))
        .await
        .unwrap();
    assert_eq!(device.current_mode(), OperatingMode::Manual);
    assert!(device.schedule(0).is_some());

    // Slot 10 does not exist; the device refuses and the failure surfaces
    // instead of being absorbed.
    let bad_slot = ManualSchedule {
        time_num: 10,
        start_time: "00:00".to_string(),
        end_time: "23:59".to_string(),
        week_set: 127,
        power: 0,
        enable: 1,
    };
    let err = poller.write_schedule(bad_slot).await.unwrap_err();
    assert!(matches!(err, CommandError::DeviceRejected { .. }));
    assert_eq!(device.current_mode(), OperatingMode::Manual);

    poller
        .set_mode(&ModeConfig::passive(-500, 600))
        .await
        .unwrap();
    assert_eq!(device.current_mode(), OperatingMode::Passive);
}

#[tokio::test]
async fn spawned_poller_publishes_then_stops_cleanly() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    let poller = poller_for(&device).await;

    // Base interval clamps to the safe minimum, so only the immediate
    // first tick fires during this test.
    let handle = poller.spawn(Duration::from_secs(1));

    wait_until(|| handle.snapshot().tick >= 1).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.tick, 1);
    assert!(snapshot.es.is_some());

    // The first tick only ran the realtime tier; an out-of-band refresh
    // polls every group without advancing the schedule.
    assert_eq!(device.method_count(method::GET_DEVICE), 0);
    handle.poll_now().await;
    wait_until(|| device.method_count(method::GET_DEVICE) >= 1).await;
    assert_eq!(handle.snapshot().tick, 1);

    handle.stop().await;

    let requests_after_stop = device.request_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(device.request_count(), requests_after_stop);
}
