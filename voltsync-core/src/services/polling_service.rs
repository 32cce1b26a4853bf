use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use voltsync_api::device::DeviceIdentity;
use voltsync_api::method;
use voltsync_api::mode::{ManualSchedule, ModeConfig};
use voltsync_api::scaling;
use voltsync_api::status::{
    BatteryStatus, BleStatus, DeviceSummary, EmStatus, EsStatus, ModeStatus, PvStatus,
    SetModeResult, WifiStatus,
};

use crate::errors::CommandError;
use crate::services::command_service::{
    COMMAND_TIMEOUT, CommandService, CommandStats, DEFAULT_ATTEMPTS,
};

/// Floor for the base tick interval; the devices get flaky when polled at a
/// faster average cadence.
pub const MIN_BASE_INTERVAL: Duration = Duration::from_secs(60);

/// A device with no successful response for longer than this is reported
/// unavailable, even though its cached values stay in the snapshot.
pub const UNAVAILABLE_AFTER_SECS: i64 = 120;

/// Retry discipline for user-triggered mode and schedule writes: rarer and
/// user-visible, so a fixed delay rather than the adaptive poll backoff.
pub const MODE_CHANGE_ATTEMPTS: u32 = 5;
pub const MODE_CHANGE_DELAY: Duration = Duration::from_secs(2);

/// Pause between consecutive schedule-slot writes.
const SCHEDULE_WRITE_GAP: Duration = Duration::from_millis(300);

/// A named set of methods polled together every `cadence` ticks.
#[derive(Debug, Clone)]
pub struct PollGroup {
    pub name: &'static str,
    pub cadence: u64,
    pub methods: Vec<&'static str>,
}

impl PollGroup {
    pub fn due_at(&self, tick: u64) -> bool {
        tick % self.cadence == 0
    }
}

/// Static polling configuration for one device: three cadences derived from
/// one tick counter, so traffic bursts stay aligned instead of drifting
/// across three timers.
#[derive(Debug, Clone)]
pub struct PollPlan {
    pub groups: Vec<PollGroup>,
}

impl PollPlan {
    pub fn new(groups: Vec<PollGroup>) -> Self {
        Self { groups }
    }

    /// Default tiering: realtime power every tick, slower-changing state
    /// every 5th, static diagnostics every 10th. Solar telemetry is only
    /// scheduled for models that carry PV hardware.
    pub fn for_device(identity: &DeviceIdentity) -> Self {
        let mut status_methods = vec![method::BATTERY_STATUS];
        if identity.has_solar() {
            status_methods.push(method::PV_STATUS);
        }
        status_methods.push(method::ES_MODE);

        Self::new(vec![
            PollGroup {
                name: "realtime",
                cadence: 1,
                methods: vec![method::ES_STATUS, method::EM_STATUS],
            },
            PollGroup {
                name: "status",
                cadence: 5,
                methods: status_methods,
            },
            PollGroup {
                name: "diagnostic",
                cadence: 10,
                methods: vec![method::GET_DEVICE, method::WIFI_STATUS, method::BLE_STATUS],
            },
        ])
    }
}

/// A snapshot section together with the tick that last refreshed it.
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub data: T,
    pub tick: u64,
    pub refreshed_at: OffsetDateTime,
}

impl<T> Stamped<T> {
    fn new(data: T, tick: u64) -> Self {
        Self {
            data,
            tick,
            refreshed_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Tri-state battery activity derived from signed battery power. Exactly
/// 0 W classifies as idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryActivity {
    Charging,
    Discharging,
    Idle,
}

impl BatteryActivity {
    pub fn from_power(power: f64) -> Self {
        if power > 0.0 {
            BatteryActivity::Charging
        } else if power < 0.0 {
            BatteryActivity::Discharging
        } else {
            BatteryActivity::Idle
        }
    }
}

impl fmt::Display for BatteryActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryActivity::Charging => write!(f, "charging"),
            BatteryActivity::Discharging => write!(f, "discharging"),
            BatteryActivity::Idle => write!(f, "idle"),
        }
    }
}

/// Values computed from already-merged snapshot fields, never fetched.
#[derive(Debug, Clone, Default)]
pub struct DerivedState {
    pub power_in: f64,
    pub power_out: f64,
    pub activity: Option<BatteryActivity>,
    /// Headroom left before the battery is full, in Wh.
    pub available_capacity: Option<f64>,
}

/// Merged view of one device, owned exclusively by its poller. Consumers
/// get clones through the watch channel and must treat them read-only.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub identity: DeviceIdentity,
    pub tick: u64,
    pub device: Option<Stamped<DeviceSummary>>,
    pub wifi: Option<Stamped<WifiStatus>>,
    pub ble: Option<Stamped<BleStatus>>,
    pub battery: Option<Stamped<BatteryStatus>>,
    pub es: Option<Stamped<EsStatus>>,
    pub em: Option<Stamped<EmStatus>>,
    pub pv: Option<Stamped<PvStatus>>,
    pub mode: Option<Stamped<ModeStatus>>,
    pub derived: DerivedState,
    pub stats: CommandStats,
    pub last_success: Option<OffsetDateTime>,
}

impl DeviceSnapshot {
    fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            tick: 0,
            device: None,
            wifi: None,
            ble: None,
            battery: None,
            es: None,
            em: None,
            pv: None,
            mode: None,
            derived: DerivedState::default(),
            stats: CommandStats::default(),
            last_success: None,
        }
    }

    /// Whether the device counted as reachable at `now`. Stale-but-present
    /// values stay in the snapshot either way; this flag tells consumers
    /// when to stop trusting them.
    pub fn is_available_at(&self, now: OffsetDateTime) -> bool {
        match self.last_success {
            Some(at) => (now - at).whole_seconds() <= UNAVAILABLE_AFTER_SECS,
            None => false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.is_available_at(OffsetDateTime::now_utc())
    }

    /// State of charge, preferring the battery section over the realtime
    /// echo in the energy-system section.
    pub fn soc(&self) -> Option<f64> {
        self.battery
            .as_ref()
            .and_then(|section| section.data.soc)
            .or_else(|| self.es.as_ref().and_then(|section| section.data.bat_soc))
    }

    fn recompute_derived(&mut self) {
        match self.es.as_ref().and_then(|section| section.data.bat_power) {
            Some(power) => {
                self.derived.power_in = power.max(0.0);
                self.derived.power_out = (-power).max(0.0);
                self.derived.activity = Some(BatteryActivity::from_power(power));
            }
            None => {
                self.derived.power_in = 0.0;
                self.derived.power_out = 0.0;
                self.derived.activity = None;
            }
        }

        let battery = self.battery.as_ref().map(|section| &section.data);
        self.derived.available_capacity = match (
            battery.and_then(|b| b.soc),
            battery.and_then(|b| b.rated_capacity),
        ) {
            (Some(soc), Some(rated)) => Some((100.0 - soc) * rated / 100.0),
            _ => None,
        };
    }
}

/// Maintains the live snapshot for one device at minimum polling cost.
///
/// Each tick increments one counter and runs whichever groups divide it;
/// groups within a tick run concurrently, methods within a group run in
/// order. A failed poll keeps the previous cached section rather than
/// blanking it.
pub struct DevicePoller {
    identity: DeviceIdentity,
    commands: Arc<CommandService>,
    plan: PollPlan,
    tick: u64,
    snapshot: DeviceSnapshot,
    snapshot_tx: watch::Sender<DeviceSnapshot>,
    poll_timeout: Duration,
    poll_attempts: u32,
    mode_attempts: u32,
    mode_retry_delay: Duration,
}

impl DevicePoller {
    pub fn new(identity: DeviceIdentity, commands: Arc<CommandService>, plan: PollPlan) -> Self {
        let snapshot = DeviceSnapshot::new(identity.clone());
        let (snapshot_tx, _) = watch::channel(snapshot.clone());

        Self {
            identity,
            commands,
            plan,
            tick: 0,
            snapshot,
            snapshot_tx,
            poll_timeout: COMMAND_TIMEOUT,
            poll_attempts: DEFAULT_ATTEMPTS,
            mode_attempts: MODE_CHANGE_ATTEMPTS,
            mode_retry_delay: MODE_CHANGE_DELAY,
        }
    }

    /// Override the per-command wait and transmission budget used while
    /// polling.
    pub fn with_command_policy(mut self, per_attempt_timeout: Duration, attempts: u32) -> Self {
        self.poll_timeout = per_attempt_timeout;
        self.poll_attempts = attempts.max(1);
        self
    }

    /// Override the mode-change retry discipline.
    pub fn with_mode_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.mode_attempts = attempts.max(1);
        self.mode_retry_delay = delay;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.clone()
    }

    /// Run one scheduling step: advance the tick counter, poll every group
    /// due at the new tick, merge, publish.
    pub async fn poll_tick(&mut self) {
        self.tick += 1;
        let tick = self.tick;

        let due: Vec<PollGroup> = self
            .plan
            .groups
            .iter()
            .filter(|group| group.due_at(tick))
            .cloned()
            .collect();

        tracing::debug!(
            device = %self.identity.link_addr,
            tick,
            groups = ?due.iter().map(|group| group.name).collect::<Vec<_>>(),
            "Polling tick"
        );

        self.execute_groups(tick, due).await;
    }

    /// Immediate out-of-band refresh of every group, regardless of cadence.
    /// Does not advance the tick counter.
    pub async fn poll_now(&mut self) {
        let tick = self.tick;
        let all = self.plan.groups.clone();
        self.execute_groups(tick, all).await;
    }

    async fn execute_groups(&mut self, tick: u64, due: Vec<PollGroup>) {
        let results = join_all(due.iter().map(|group| self.poll_group(group))).await;

        for (method_name, result) in results.into_iter().flatten() {
            match result {
                Ok(value) => self.merge(method_name, value, tick),
                Err(err) => tracing::warn!(
                    device = %self.identity.link_addr,
                    method = method_name,
                    "Poll failed, keeping cached section: {err}"
                ),
            }
        }

        self.snapshot.tick = tick;
        self.snapshot.stats = self.commands.stats_for(self.identity.addr());
        self.snapshot.last_success = self.snapshot.stats.last_success;
        self.snapshot.recompute_derived();
        self.snapshot_tx.send_replace(self.snapshot.clone());
    }

    async fn poll_group(
        &self,
        group: &PollGroup,
    ) -> Vec<(&'static str, Result<Value, CommandError>)> {
        let mut results = Vec::with_capacity(group.methods.len());

        for method_name in &group.methods {
            let result = self
                .commands
                .execute(
                    self.identity.addr(),
                    method_name,
                    None,
                    self.poll_timeout,
                    self.poll_attempts,
                )
                .await;
            results.push((*method_name, result));
        }

        results
    }

    fn merge(&mut self, method_name: &str, value: Value, tick: u64) {
        let firmware = self.identity.firmware;

        match method_name {
            method::ES_STATUS => {
                if let Some(mut status) = decode::<EsStatus>(method_name, value) {
                    scaling::scale_es_status(&mut status, firmware);
                    self.snapshot.es = Some(Stamped::new(status, tick));
                }
            }
            method::EM_STATUS => {
                if let Some(status) = decode::<EmStatus>(method_name, value) {
                    self.snapshot.em = Some(Stamped::new(status, tick));
                }
            }
            method::BATTERY_STATUS => {
                if let Some(mut status) = decode::<BatteryStatus>(method_name, value) {
                    scaling::scale_battery_status(&mut status, firmware);
                    self.snapshot.battery = Some(Stamped::new(status, tick));
                }
            }
            method::PV_STATUS => {
                if let Some(status) = decode::<PvStatus>(method_name, value) {
                    self.snapshot.pv = Some(Stamped::new(status, tick));
                }
            }
            method::ES_MODE => {
                if let Some(status) = decode::<ModeStatus>(method_name, value) {
                    self.snapshot.mode = Some(Stamped::new(status, tick));
                }
            }
            method::GET_DEVICE => {
                if let Some(summary) = decode::<DeviceSummary>(method_name, value) {
                    self.snapshot.device = Some(Stamped::new(summary, tick));
                }
            }
            method::WIFI_STATUS => {
                if let Some(status) = decode::<WifiStatus>(method_name, value) {
                    self.snapshot.wifi = Some(Stamped::new(status, tick));
                }
            }
            method::BLE_STATUS => {
                if let Some(status) = decode::<BleStatus>(method_name, value) {
                    self.snapshot.ble = Some(Stamped::new(status, tick));
                }
            }
            other => {
                tracing::debug!(method = other, "Unhandled poll result");
            }
        }
    }

    /// Change the operating mode. User-triggered: retried on a fixed
    /// schedule and surfaced loudly on rejection, never absorbed into the
    /// polling statistics.
    pub async fn set_mode(&self, config: &ModeConfig) -> Result<(), CommandError> {
        change_mode(
            &self.commands,
            self.identity.addr(),
            config,
            self.mode_attempts,
            self.mode_retry_delay,
            self.poll_timeout,
        )
        .await
    }

    /// Write one manual schedule slot.
    pub async fn write_schedule(&self, schedule: ManualSchedule) -> Result<(), CommandError> {
        self.set_mode(&ModeConfig::manual(schedule)).await
    }

    /// Disable every manual schedule slot.
    pub async fn clear_schedules(&self) -> Result<(), CommandError> {
        for slot in 0..ManualSchedule::MAX_SLOTS {
            self.set_mode(&ModeConfig::manual(ManualSchedule::disabled(slot)))
                .await?;
            tokio::time::sleep(SCHEDULE_WRITE_GAP).await;
        }
        Ok(())
    }

    /// Move the poller onto its own task ticking at `base_interval`
    /// (clamped to the safe minimum). The first tick fires immediately.
    pub fn spawn(mut self, base_interval: Duration) -> PollerHandle {
        let base = base_interval.max(MIN_BASE_INTERVAL);
        let snapshot_rx = self.snapshot_tx.subscribe();
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let identity = self.identity.clone();
        let commands = self.commands.clone();
        let mode_attempts = self.mode_attempts;
        let mode_retry_delay = self.mode_retry_delay;
        let poll_timeout = self.poll_timeout;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(base);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let work = tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => PollerWork::Tick,
                    Some(command) = cmd_rx.recv() => match command {
                        PollerCommand::PollNow => PollerWork::Refresh,
                    },
                };

                // Stopping mid-poll drops the in-flight commands and their
                // listener registrations; a half-finished poll publishes
                // nothing.
                let stopped = tokio::select! {
                    _ = &mut stop_rx => true,
                    _ = async {
                        match work {
                            PollerWork::Tick => self.poll_tick().await,
                            PollerWork::Refresh => self.poll_now().await,
                        }
                    } => false,
                };
                if stopped {
                    break;
                }
            }

            tracing::info!(device = %self.identity.link_addr, "Poller stopped");
        });

        PollerHandle {
            identity,
            commands,
            snapshot_rx,
            cmd_tx,
            stop_tx: Some(stop_tx),
            task,
            mode_attempts,
            mode_retry_delay,
            poll_timeout,
        }
    }
}

enum PollerCommand {
    PollNow,
}

enum PollerWork {
    Tick,
    Refresh,
}

/// Handle to a running poller task: snapshot access plus the user-initiated
/// operations. Dropping the handle leaves the task running; call
/// [`PollerHandle::stop`] to tear the device down.
pub struct PollerHandle {
    identity: DeviceIdentity,
    commands: Arc<CommandService>,
    snapshot_rx: watch::Receiver<DeviceSnapshot>,
    cmd_tx: mpsc::Sender<PollerCommand>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    mode_attempts: u32,
    mode_retry_delay: Duration,
    poll_timeout: Duration,
}

impl PollerHandle {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Queue an immediate full refresh on the poller task.
    pub async fn poll_now(&self) {
        let _ = self.cmd_tx.send(PollerCommand::PollNow).await;
    }

    pub async fn set_mode(&self, config: &ModeConfig) -> Result<(), CommandError> {
        change_mode(
            &self.commands,
            self.identity.addr(),
            config,
            self.mode_attempts,
            self.mode_retry_delay,
            self.poll_timeout,
        )
        .await
    }

    pub async fn write_schedule(&self, schedule: ManualSchedule) -> Result<(), CommandError> {
        self.set_mode(&ModeConfig::manual(schedule)).await
    }

    /// Disable every manual schedule slot.
    pub async fn clear_schedules(&self) -> Result<(), CommandError> {
        for slot in 0..ManualSchedule::MAX_SLOTS {
            self.set_mode(&ModeConfig::manual(ManualSchedule::disabled(slot)))
                .await?;
            tokio::time::sleep(SCHEDULE_WRITE_GAP).await;
        }
        Ok(())
    }

    /// Cancel the tick loop and any poll in flight. A half-finished tick
    /// publishes nothing further.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

async fn change_mode(
    commands: &CommandService,
    device: SocketAddr,
    config: &ModeConfig,
    attempts: u32,
    delay: Duration,
    per_attempt_timeout: Duration,
) -> Result<(), CommandError> {
    let params = json!({ "id": 0, "config": config });
    let mut last_error: Option<CommandError> = None;

    for attempt in 1..=attempts {
        let outcome = commands
            .execute(
                device,
                method::ES_SET_MODE,
                Some(params.clone()),
                per_attempt_timeout,
                1,
            )
            .await;

        match outcome {
            Ok(result) => match serde_json::from_value::<SetModeResult>(result) {
                Ok(confirmation) if confirmation.set_result => {
                    tracing::info!(%device, mode = %config.mode, "Operating mode changed");
                    return Ok(());
                }
                Ok(_) => {
                    tracing::warn!(
                        %device,
                        mode = %config.mode,
                        attempt,
                        attempts,
                        "Device rejected mode change"
                    );
                    last_error = Some(CommandError::DeviceRejected {
                        method: method::ES_SET_MODE.to_string(),
                        reason: "set_result is false".to_string(),
                    });
                }
                Err(err) => {
                    last_error = Some(CommandError::MalformedResponse {
                        method: method::ES_SET_MODE.to_string(),
                        reason: err.to_string(),
                    });
                }
            },
            Err(err) => {
                tracing::warn!(%device, attempt, attempts, "Mode change attempt failed: {err}");
                last_error = Some(err);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(last_error.unwrap_or(CommandError::Timeout {
        method: method::ES_SET_MODE.to_string(),
        attempts,
    }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Merged snapshot built without driving a socket.
    pub(crate) fn snapshot_for_test(
        identity: DeviceIdentity,
        es: EsStatus,
        battery: BatteryStatus,
        last_success: OffsetDateTime,
    ) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot::new(identity);
        snapshot.es = Some(Stamped::new(es, 1));
        snapshot.battery = Some(Stamped::new(battery, 1));
        snapshot.last_success = Some(last_success);
        snapshot.recompute_derived();
        snapshot
    }
}

fn decode<T: DeserializeOwned>(method_name: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            tracing::warn!(method = method_name, "Undecodable result payload: {err}");
            None
        }
    }
}
