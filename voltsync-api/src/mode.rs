//! Operating modes and the configuration payloads accepted by `ES.SetMode`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Weekday bitmap covering Monday through Sunday.
pub const ALL_WEEK: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Auto,
    #[serde(rename = "AI")]
    Ai,
    Manual,
    Passive,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Auto => write!(f, "Auto"),
            OperatingMode::Ai => write!(f, "AI"),
            OperatingMode::Manual => write!(f, "Manual"),
            OperatingMode::Passive => write!(f, "Passive"),
        }
    }
}

/// One manual-mode schedule slot. Devices expose [`ManualSchedule::MAX_SLOTS`]
/// slots addressed by `time_num`; times are "HH:MM" on-device local time and
/// `power` is signed (negative charges, positive discharges, 0 no limit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualSchedule {
    pub time_num: u8,
    pub start_time: String,
    pub end_time: String,
    pub week_set: u8,
    pub power: i32,
    pub enable: u8,
}

impl ManualSchedule {
    pub const MAX_SLOTS: u8 = 10;

    /// Slot that runs all week with no power limit.
    pub fn all_week(slot: u8, power: i32) -> Self {
        Self {
            time_num: slot,
            start_time: "00:00".to_string(),
            end_time: "23:59".to_string(),
            week_set: ALL_WEEK,
            power,
            enable: 1,
        }
    }

    /// Cleared slot, used when wiping a device's schedule table.
    pub fn disabled(slot: u8) -> Self {
        Self {
            time_num: slot,
            start_time: "00:00".to_string(),
            end_time: "00:00".to_string(),
            week_set: 0,
            power: 0,
            enable: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableFlag {
    pub enable: u8,
}

/// Passive mode: hold `power` watts for `cd_time` seconds, then revert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveConfig {
    pub power: i32,
    pub cd_time: u32,
}

/// `config` parameter of `ES.SetMode`. Exactly the section matching `mode`
/// is serialized; the others are omitted from the datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub mode: OperatingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cfg: Option<EnableFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_cfg: Option<EnableFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_cfg: Option<ManualSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive_cfg: Option<PassiveConfig>,
}

impl ModeConfig {
    pub fn auto() -> Self {
        Self {
            mode: OperatingMode::Auto,
            auto_cfg: Some(EnableFlag { enable: 1 }),
            ai_cfg: None,
            manual_cfg: None,
            passive_cfg: None,
        }
    }

    pub fn ai() -> Self {
        Self {
            mode: OperatingMode::Ai,
            auto_cfg: None,
            ai_cfg: Some(EnableFlag { enable: 1 }),
            manual_cfg: None,
            passive_cfg: None,
        }
    }

    pub fn manual(schedule: ManualSchedule) -> Self {
        Self {
            mode: OperatingMode::Manual,
            auto_cfg: None,
            ai_cfg: None,
            manual_cfg: Some(schedule),
            passive_cfg: None,
        }
    }

    pub fn passive(power: i32, cd_time: u32) -> Self {
        Self {
            mode: OperatingMode::Passive,
            auto_cfg: None,
            ai_cfg: None,
            manual_cfg: None,
            passive_cfg: Some(PassiveConfig { power, cd_time }),
        }
    }

    /// Default configuration when the caller only names a mode: manual runs
    /// slot 0 all week without a limit, passive holds 0 W for five minutes.
    pub fn default_for(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::Auto => Self::auto(),
            OperatingMode::Ai => Self::ai(),
            OperatingMode::Manual => Self::manual(ManualSchedule::all_week(0, 0)),
            OperatingMode::Passive => Self::passive(0, 300),
        }
    }

    /// The section matching `mode` is present and, for manual mode, names a
    /// valid slot. Devices refuse configs that fail this check.
    pub fn is_coherent(&self) -> bool {
        match self.mode {
            OperatingMode::Auto => self.auto_cfg.is_some(),
            OperatingMode::Ai => self.ai_cfg.is_some(),
            OperatingMode::Manual => self
                .manual_cfg
                .as_ref()
                .is_some_and(|cfg| cfg.time_num < ManualSchedule::MAX_SLOTS),
            OperatingMode::Passive => self.passive_cfg.is_some(),
        }
    }
}
