// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridSage.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============= Battery =============

/// Point-in-time battery reading produced by the inverter every poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    /// State of charge (0-100%)
    pub soc_percent: f32,

    /// Battery voltage (V)
    pub voltage_v: f32,

    /// Battery current (A), positive = charging
    pub current_a: f32,

    /// Battery power (W), positive = charging
    pub power_w: f32,

    /// Battery temperature (°C)
    pub temperature_c: f32,

    /// Inverter reports the battery as charging
    pub is_charging: bool,

    /// Inverter reports the battery as discharging
    pub is_discharging: bool,

    /// When this reading was taken
    pub timestamp: DateTime<Utc>,
}

impl BatterySnapshot {
    /// Create a snapshot with the given SOC and neutral electrical readings.
    ///
    /// The SOC is clamped into 0-100%; out-of-range values are logged.
    pub fn new(soc_percent: f32, timestamp: DateTime<Utc>) -> Self {
        Self {
            soc_percent: clamp_soc(soc_percent),
            voltage_v: 0.0,
            current_a: 0.0,
            power_w: 0.0,
            temperature_c: 20.0,
            is_charging: false,
            is_discharging: false,
            timestamp,
        }
    }

    /// Same snapshot with the charging flag set
    #[must_use]
    pub fn charging(mut self, is_charging: bool) -> Self {
        self.is_charging = is_charging;
        self
    }

    /// Same snapshot with the discharging flag set
    #[must_use]
    pub fn discharging(mut self, is_discharging: bool) -> Self {
        self.is_discharging = is_discharging;
        self
    }

    /// Same snapshot with a battery temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature_c: f32) -> Self {
        self.temperature_c = temperature_c;
        self
    }

    /// SOC clamped into 0-100%, whatever the collaborator reported
    pub fn soc(&self) -> f32 {
        clamp_soc(self.soc_percent)
    }
}

/// Clamp a reported SOC into 0-100%.
pub fn clamp_soc(soc_percent: f32) -> f32 {
    if soc_percent.is_nan() {
        tracing::warn!("Battery SOC reading is NaN, treating as 0%");
        return 0.0;
    }
    if !(0.0..=100.0).contains(&soc_percent) {
        tracing::warn!("Battery SOC {:.1}% out of range, clamping to 0-100%", soc_percent);
    }
    soc_percent.clamp(0.0, 100.0)
}

// ============= Power Flow =============

/// Point-in-time household power flow reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerFlowSnapshot {
    /// PV generation (W)
    pub pv_power_w: f32,

    /// House consumption (W)
    pub house_load_w: f32,

    /// Grid power (W), positive = import, negative = export
    pub grid_power_w: f32,

    /// Grid voltage (V)
    pub grid_voltage_v: f32,
}

impl Default for PowerFlowSnapshot {
    fn default() -> Self {
        Self {
            pv_power_w: 0.0,
            house_load_w: 0.0,
            grid_power_w: 0.0,
            grid_voltage_v: 230.0,
        }
    }
}

impl PowerFlowSnapshot {
    /// PV minus house consumption (W)
    pub fn net_power_w(&self) -> f32 {
        self.pv_power_w - self.house_load_w
    }

    /// PV exceeds consumption by more than the given margin
    pub fn is_pv_surplus(&self, margin_w: f32) -> bool {
        self.net_power_w() > margin_w
    }

    /// House consumes more than PV produces
    pub fn is_pv_deficit(&self) -> bool {
        self.net_power_w() < 0.0
    }

    /// Drawing power from the grid
    pub fn is_grid_import(&self) -> bool {
        self.grid_power_w > 0.0
    }
}

/// Short-term solar outlook supplied alongside telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvOutlook {
    /// Weather/PV forecast is trustworthy for the next hours
    pub reliable: bool,

    /// PV output is expected to improve within the next few hours
    pub improving_soon: bool,
}

// ============= Inverter Commands =============

/// Command kinds accepted by the inverter collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    StartCharge,
    StopCharge,
    StartSell,
    StopSell,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartCharge => write!(f, "start-charge"),
            Self::StopCharge => write!(f, "stop-charge"),
            Self::StartSell => write!(f, "start-sell"),
            Self::StopSell => write!(f, "stop-sell"),
        }
    }
}

/// Command sent to the inverter collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverterCommand {
    pub kind: CommandKind,

    /// Requested charge/discharge power (W), zero for stop commands
    pub target_power_w: f32,

    /// SOC at which the inverter should end the operation
    pub target_soc: Option<f32>,
}

impl InverterCommand {
    pub fn start_charge(target_power_w: f32, target_soc: f32) -> Self {
        Self {
            kind: CommandKind::StartCharge,
            target_power_w,
            target_soc: Some(target_soc),
        }
    }

    pub fn stop_charge() -> Self {
        Self {
            kind: CommandKind::StopCharge,
            target_power_w: 0.0,
            target_soc: None,
        }
    }

    pub fn start_sell(target_power_w: f32, target_soc: f32) -> Self {
        Self {
            kind: CommandKind::StartSell,
            target_power_w,
            target_soc: Some(target_soc),
        }
    }

    pub fn stop_sell() -> Self {
        Self {
            kind: CommandKind::StopSell,
            target_power_w: 0.0,
            target_soc: None,
        }
    }
}

impl fmt::Display for InverterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_soc {
            Some(soc) => write!(f, "{} @ {:.0} W -> {:.0}%", self.kind, self.target_power_w, soc),
            None => write!(f, "{}", self.kind),
        }
    }
}
