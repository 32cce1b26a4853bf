use time::OffsetDateTime;
use tokio::sync::watch;

use crate::services::polling_service::{BatteryActivity, DeviceSnapshot};

/// Synthetic combined view over every member device. Derived data only:
/// recomputed from the current snapshots on every read, so it can never go
/// stale on its own.
#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    pub device_count: usize,
    pub unavailable_count: usize,
    /// AND-reduction of member availability.
    pub all_connected: bool,
    pub total_battery_power: f64,
    pub total_power_in: f64,
    pub total_power_out: f64,
    pub total_rated_capacity: f64,
    pub total_remaining_capacity: f64,
    pub total_available_capacity: f64,
    /// Mean state of charge across available members; `None` when no
    /// available member reports one.
    pub average_soc: Option<f64>,
    pub combined_activity: Option<BatteryActivity>,
    pub total_solar_power: f64,
    pub total_pv_energy: f64,
    pub total_grid_power: f64,
    pub total_grid_import: f64,
    pub total_grid_export: f64,
    pub total_load_energy: f64,
    pub total_offgrid_power: f64,
}

/// Reduce member snapshots into a fleet view as of `now`. Unavailable
/// members are excluded from every sum and from the SOC average, and
/// counted instead; treating them as zero would silently misreport the
/// fleet.
pub fn aggregate_at<I>(snapshots: I, now: OffsetDateTime) -> FleetSnapshot
where
    I: IntoIterator<Item = DeviceSnapshot>,
{
    let mut fleet = FleetSnapshot {
        all_connected: true,
        ..FleetSnapshot::default()
    };

    let mut soc_sum = 0.0;
    let mut soc_count = 0usize;
    let mut battery_power_seen = false;

    for snapshot in snapshots {
        fleet.device_count += 1;

        if !snapshot.is_available_at(now) {
            fleet.unavailable_count += 1;
            fleet.all_connected = false;
            continue;
        }

        if let Some(soc) = snapshot.soc() {
            soc_sum += soc;
            soc_count += 1;
        }

        if let Some(section) = &snapshot.es {
            let es = &section.data;
            if let Some(power) = es.bat_power {
                fleet.total_battery_power += power;
                battery_power_seen = true;
            }
            fleet.total_solar_power += es.pv_power.unwrap_or(0.0);
            fleet.total_pv_energy += es.total_pv_energy.unwrap_or(0.0);
            fleet.total_grid_power += es.ongrid_power.unwrap_or(0.0);
            fleet.total_grid_import += es.total_grid_input_energy.unwrap_or(0.0);
            fleet.total_grid_export += es.total_grid_output_energy.unwrap_or(0.0);
            fleet.total_load_energy += es.total_load_energy.unwrap_or(0.0);
            fleet.total_offgrid_power += es.offgrid_power.unwrap_or(0.0);
        }

        if let Some(section) = &snapshot.battery {
            let battery = &section.data;
            fleet.total_rated_capacity += battery.rated_capacity.unwrap_or(0.0);
            fleet.total_remaining_capacity += battery.bat_capacity.unwrap_or(0.0);
        }

        fleet.total_power_in += snapshot.derived.power_in;
        fleet.total_power_out += snapshot.derived.power_out;
        fleet.total_available_capacity += snapshot.derived.available_capacity.unwrap_or(0.0);
    }

    if soc_count > 0 {
        fleet.average_soc = Some(soc_sum / soc_count as f64);
    }
    if battery_power_seen {
        fleet.combined_activity = Some(BatteryActivity::from_power(fleet.total_battery_power));
    }

    fleet
}

pub fn aggregate<I>(snapshots: I) -> FleetSnapshot
where
    I: IntoIterator<Item = DeviceSnapshot>,
{
    aggregate_at(snapshots, OffsetDateTime::now_utc())
}

/// Stateless reader over the member pollers' watch channels.
#[derive(Default)]
pub struct FleetService {
    members: Vec<watch::Receiver<DeviceSnapshot>>,
}

impl FleetService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&mut self, member: watch::Receiver<DeviceSnapshot>) {
        self.members.push(member);
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Fresh fleet view from the members' current snapshots.
    pub fn snapshot(&self) -> FleetSnapshot {
        aggregate(self.members.iter().map(|member| member.borrow().clone()))
    }
}
