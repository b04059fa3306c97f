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

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use gridsage_types::config::SellingConfig;
use gridsage_types::{BatterySnapshot, PowerFlowSnapshot};

/// Result of the pre-sell safety checks, listing every failed check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyReport {
    pub failures: Vec<String>,
}

impl SafetyReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Check battery temperature, grid voltage and night hours
pub fn safety_report(
    config: &SellingConfig,
    tz: Tz,
    battery: &BatterySnapshot,
    power: &PowerFlowSnapshot,
    now: DateTime<Utc>,
) -> SafetyReport {
    let mut failures = Vec::new();

    let temp = battery.temperature_c;
    if !(config.min_battery_temp_c..=config.max_battery_temp_c).contains(&temp) {
        failures.push(format!(
            "battery temperature {temp:.1}°C outside {:.0}-{:.0}°C",
            config.min_battery_temp_c, config.max_battery_temp_c
        ));
    }

    let voltage = power.grid_voltage_v;
    if !(config.min_grid_voltage_v..=config.max_grid_voltage_v).contains(&voltage) {
        failures.push(format!(
            "grid voltage {voltage:.0} V outside {:.0}-{:.0} V",
            config.min_grid_voltage_v, config.max_grid_voltage_v
        ));
    }

    let hour = now.with_timezone(&tz).hour();
    if config.is_night_hour(hour) {
        failures.push(format!(
            "night hours {:02}:00-{:02}:00",
            config.night_start_hour, config.night_end_hour
        ));
    }

    SafetyReport { failures }
}
