use std::collections::HashSet;
use std::time::{Duration, Instant};

use voltsync_api::method;
use voltsync_core::{CommandError, CommandService, RetryPolicy};
use voltsync_mock::{MockDevice, MockDeviceConfig};

mod common;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_jitter: Duration::from_millis(25),
    }
}

#[tokio::test]
async fn execute_resolves_with_the_result_payload() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    let commands = CommandService::new(common::loopback_mux().await);

    let result = commands
        .execute(
            device.addr(),
            method::GET_DEVICE,
            None,
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap();

    assert_eq!(result["device"], "VS300");
    assert_eq!(result["wifi_mac"], "AA:BB:CC:DD:EE:01");

    let stats = commands.stats_for(device.addr());
    assert_eq!(stats.total_attempts, 1);
    assert_eq!(stats.total_success, 1);
    assert_eq!(stats.total_timeouts, 0);
    assert!(stats.last_latency.is_some());
    assert!(stats.last_success.is_some());
}

#[tokio::test]
async fn silent_device_exhausts_exactly_the_attempt_budget() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    device.set_silent(true);

    let commands = CommandService::with_retry(common::loopback_mux().await, fast_retry());

    let started = Instant::now();
    let err = commands
        .execute(
            device.addr(),
            method::ES_STATUS,
            None,
            Duration::from_millis(100),
            3,
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        CommandError::Timeout { attempts: 3, .. }
    ));
    assert_eq!(device.request_count(), 3);

    // Three 100ms waits plus two backoffs (50ms, then 100ms) at minimum.
    assert!(elapsed >= Duration::from_millis(450), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");

    let stats = commands.stats_for(device.addr());
    assert_eq!(stats.total_attempts, 3);
    assert_eq!(stats.total_timeouts, 3);
    assert_eq!(stats.total_success, 0);
    assert!(stats.last_error.is_some());
}

#[tokio::test]
async fn device_rejection_fails_without_retransmission() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    let commands = CommandService::new(common::loopback_mux().await);

    let err = commands
        .execute(
            device.addr(),
            "ES.NoSuchMethod",
            None,
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::DeviceRejected { .. }));
    // A definitive rejection consumes one transmission, not the budget.
    assert_eq!(device.request_count(), 1);
}

#[tokio::test]
async fn duplicate_responses_resolve_a_command_once() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    device.set_duplicate_responses(true);

    let commands = CommandService::new(common::loopback_mux().await);

    let first = commands
        .execute(
            device.addr(),
            method::GET_DEVICE,
            None,
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap();
    assert_eq!(first["device"], "VS300");

    // The stale duplicate of the first response matches no pending id and
    // must not disturb the next exchange.
    let second = commands
        .execute(
            device.addr(),
            method::ES_STATUS,
            None,
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap();
    assert!(second.get("bat_soc").is_some());

    let stats = commands.stats_for(device.addr());
    assert_eq!(stats.total_success, 2);
    assert_eq!(stats.total_attempts, 2);
}

#[tokio::test]
async fn concurrent_commands_hold_distinct_correlation_ids() {
    let device = MockDevice::spawn(MockDeviceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    let commands = CommandService::new(common::loopback_mux().await);

    let run = |method_name: &'static str| {
        commands.execute(
            device.addr(),
            method_name,
            None,
            Duration::from_secs(2),
            3,
        )
    };

    let (a, b, c, d, e) = tokio::join!(
        run(method::GET_DEVICE),
        run(method::ES_STATUS),
        run(method::EM_STATUS),
        run(method::BATTERY_STATUS),
        run(method::WIFI_STATUS),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok() && e.is_ok());

    let ids = device.seen_ids();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 5);
    assert_eq!(unique.len(), 5);
}
