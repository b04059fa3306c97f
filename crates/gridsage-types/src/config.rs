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

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable holding an explicit config file path
pub const CONFIG_PATH_ENV: &str = "GRIDSAGE_CONFIG";

// ============= System Configuration =============

/// Central configuration for the GridSage decision engine
///
/// Loaded once per process lifetime. Every section falls back to its defaults when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub system: SystemSettingsConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub price_history: PriceHistoryConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub spike: SpikeConfig,
    #[serde(default)]
    pub charging: ChargingConfig,
    #[serde(default)]
    pub selling: SellingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSettingsConfig {
    /// IANA timezone used for local midnight and hour-of-day rules
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Directory holding the price cache and decision records
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Decision loop period (seconds)
    #[serde(default = "default_decision_interval_secs")]
    pub decision_interval_secs: u64,

    /// Telemetry poll period (seconds)
    #[serde(default = "default_telemetry_poll_secs")]
    pub telemetry_poll_secs: u64,

    /// Price refresh period (seconds)
    #[serde(default = "default_price_poll_secs")]
    pub price_poll_secs: u64,

    /// Log decisions without sending inverter commands
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for SystemSettingsConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            data_dir: default_data_dir(),
            decision_interval_secs: default_decision_interval_secs(),
            telemetry_poll_secs: default_telemetry_poll_secs(),
            price_poll_secs: default_price_poll_secs(),
            dry_run: false,
        }
    }
}

fn default_timezone() -> String {
    "Europe/Warsaw".to_owned()
}
fn default_data_dir() -> String {
    "./data".to_owned()
}
fn default_decision_interval_secs() -> u64 {
    900
}
fn default_telemetry_poll_secs() -> u64 {
    60
}
fn default_price_poll_secs() -> u64 {
    900
}

/// Physical battery parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Usable capacity (kWh)
    #[serde(default = "default_capacity_kwh")]
    pub capacity_kwh: f32,

    /// Maximum grid charge rate (kW)
    #[serde(default = "default_charge_rate_kw")]
    pub max_charge_rate_kw: f32,

    /// Maximum discharge/export rate (kW)
    #[serde(default = "default_discharge_rate_kw")]
    pub max_discharge_rate_kw: f32,

    /// Round-trip share kept while charging (0-1)
    #[serde(default = "default_efficiency")]
    pub charge_efficiency: f32,

    /// Share delivered to the grid while discharging (0-1)
    #[serde(default = "default_efficiency")]
    pub discharge_efficiency: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: default_capacity_kwh(),
            max_charge_rate_kw: default_charge_rate_kw(),
            max_discharge_rate_kw: default_discharge_rate_kw(),
            charge_efficiency: default_efficiency(),
            discharge_efficiency: default_efficiency(),
        }
    }
}

impl BatteryConfig {
    /// Energy needed to move from `from_soc` to `to_soc` (kWh), zero when already there
    pub fn energy_between(&self, from_soc: f32, to_soc: f32) -> f32 {
        ((to_soc - from_soc).max(0.0) / 100.0) * self.capacity_kwh
    }

    /// Hours of grid charging needed to move from `from_soc` to `to_soc`
    pub fn hours_to_charge(&self, from_soc: f32, to_soc: f32) -> f32 {
        if self.max_charge_rate_kw <= 0.0 {
            return f32::INFINITY;
        }
        self.energy_between(from_soc, to_soc) / self.max_charge_rate_kw
    }
}

fn default_capacity_kwh() -> f32 {
    10.0
}
fn default_charge_rate_kw() -> f32 {
    5.0
}
fn default_discharge_rate_kw() -> f32 {
    5.0
}
fn default_efficiency() -> f32 {
    0.95
}

/// Rolling price window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryConfig {
    /// Days kept in the rolling window
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Samples per day (96 = 15-minute resolution)
    #[serde(default = "default_samples_per_day")]
    pub samples_per_day: u32,

    /// Persist the cache every N accepted inserts
    #[serde(default = "default_flush_every")]
    pub flush_every: u32,

    /// Samples required before statistics are considered valid
    #[serde(default = "default_min_valid_samples")]
    pub min_valid_samples: usize,

    /// Cache file name inside `system.data_dir`
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
}

impl Default for PriceHistoryConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            samples_per_day: default_samples_per_day(),
            flush_every: default_flush_every(),
            min_valid_samples: default_min_valid_samples(),
            cache_file: default_cache_file(),
        }
    }
}

impl PriceHistoryConfig {
    /// Ring buffer capacity (lookback_days × samples_per_day)
    pub fn capacity(&self) -> usize {
        (self.lookback_days.max(1) * self.samples_per_day.max(1)) as usize
    }
}

fn default_lookback_days() -> u32 {
    7
}
fn default_samples_per_day() -> u32 {
    96
}
fn default_flush_every() -> u32 {
    10
}
fn default_min_valid_samples() -> usize {
    24
}
fn default_cache_file() -> String {
    "price_history.json".to_owned()
}

// ============= Thresholds =============

/// How the adaptive thresholds are derived from statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    /// Threshold = median × multiplier
    #[default]
    Multiplier,
    /// Threshold = configured percentile
    Percentile,
}

/// A named group of calendar months sharing one multiplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonConfig {
    pub name: String,
    /// Months 1-12
    pub months: Vec<u32>,
    pub multiplier: f32,
}

impl SeasonConfig {
    pub fn new(name: &str, months: &[u32], multiplier: f32) -> Self {
        Self {
            name: name.to_owned(),
            months: months.to_vec(),
            multiplier,
        }
    }

    pub fn contains_month(&self, month: u32) -> bool {
        self.months.contains(&month)
    }
}

/// First season whose month list contains `month`
pub fn season_for_month(seasons: &[SeasonConfig], month: u32) -> Option<&SeasonConfig> {
    seasons.iter().find(|s| s.contains_month(month))
}

/// Adaptive high/critical price threshold settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub method: ThresholdMethod,

    /// High threshold = median × this (multiplier method)
    #[serde(default = "default_high_multiplier")]
    pub high_multiplier: f32,

    /// Critical threshold = median × this (multiplier method)
    #[serde(default = "default_critical_multiplier")]
    pub critical_multiplier: f32,

    /// High threshold percentile (percentile method, 25/50/75/90)
    #[serde(default = "default_high_percentile")]
    pub high_percentile: f32,

    /// Critical threshold percentile (percentile method, 25/50/75/90)
    #[serde(default = "default_critical_percentile")]
    pub critical_percentile: f32,

    #[serde(default = "default_threshold_seasons")]
    pub seasons: Vec<SeasonConfig>,

    /// Used when there are no price samples at all
    #[serde(default = "default_fallback_high_price")]
    pub fallback_high_price: f32,

    #[serde(default = "default_fallback_critical_price")]
    pub fallback_critical_price: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::default(),
            high_multiplier: default_high_multiplier(),
            critical_multiplier: default_critical_multiplier(),
            high_percentile: default_high_percentile(),
            critical_percentile: default_critical_percentile(),
            seasons: default_threshold_seasons(),
            fallback_high_price: default_fallback_high_price(),
            fallback_critical_price: default_fallback_critical_price(),
        }
    }
}

fn default_high_multiplier() -> f32 {
    1.5
}
fn default_critical_multiplier() -> f32 {
    1.3
}
fn default_high_percentile() -> f32 {
    75.0
}
fn default_critical_percentile() -> f32 {
    50.0
}
fn default_threshold_seasons() -> Vec<SeasonConfig> {
    vec![
        SeasonConfig::new("winter", &[11, 12, 1, 2], 1.3),
        SeasonConfig::new("summer", &[5, 6, 7, 8], 0.85),
        SeasonConfig::new("shoulder", &[3, 4, 9, 10], 1.0),
    ]
}
fn default_fallback_high_price() -> f32 {
    0.90
}
fn default_fallback_critical_price() -> f32 {
    0.70
}

// ============= Spike Detection =============

/// Live price spike detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeConfig {
    /// Ring buffer capacity for live samples
    #[serde(default = "default_spike_capacity")]
    pub history_capacity: usize,

    /// Samples required before anything is classified
    #[serde(default = "default_min_price_samples")]
    pub min_price_samples: usize,

    /// Window for the reference median (minutes)
    #[serde(default = "default_spike_lookback_minutes")]
    pub lookback_minutes: i64,

    #[serde(default = "default_moderate_spike_percent")]
    pub moderate_spike_percent: f32,

    #[serde(default = "default_high_spike_percent")]
    pub high_spike_percent: f32,

    #[serde(default = "default_extreme_spike_percent")]
    pub extreme_spike_percent: f32,

    /// Absolute price at or above which a spike is always extreme
    #[serde(default = "default_critical_price_threshold")]
    pub critical_price_threshold: f32,

    /// Spikes older than this no longer trigger out-of-schedule selling (minutes)
    #[serde(default = "default_spike_active_minutes")]
    pub active_max_age_minutes: i64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_spike_capacity(),
            min_price_samples: default_min_price_samples(),
            lookback_minutes: default_spike_lookback_minutes(),
            moderate_spike_percent: default_moderate_spike_percent(),
            high_spike_percent: default_high_spike_percent(),
            extreme_spike_percent: default_extreme_spike_percent(),
            critical_price_threshold: default_critical_price_threshold(),
            active_max_age_minutes: default_spike_active_minutes(),
        }
    }
}

fn default_spike_capacity() -> usize {
    100
}
fn default_min_price_samples() -> usize {
    3
}
fn default_spike_lookback_minutes() -> i64 {
    60
}
fn default_moderate_spike_percent() -> f32 {
    15.0
}
fn default_high_spike_percent() -> f32 {
    30.0
}
fn default_extreme_spike_percent() -> f32 {
    50.0
}
fn default_critical_price_threshold() -> f32 {
    1.50
}
fn default_spike_active_minutes() -> i64 {
    15
}

// ============= Charging =============

/// Tiered charging policy, overrides and session limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingConfig {
    /// Below this SOC charging is unconditional
    #[serde(default = "default_emergency_soc")]
    pub emergency_soc: f32,

    /// Upper bound of the critical tier
    #[serde(default = "default_critical_soc")]
    pub critical_soc: f32,

    /// Upper bound of the opportunistic tier
    #[serde(default = "default_normal_soc")]
    pub normal_soc: f32,

    /// Sessions stop at this SOC
    #[serde(default = "default_stop_soc")]
    pub stop_soc: f32,

    /// SOC a super-low-price session aims for
    #[serde(default = "default_target_soc")]
    pub target_soc: f32,

    /// At or below this price the battery is filled from the grid
    #[serde(default = "default_super_low_price")]
    pub super_low_price: f32,

    /// Solar may replace grid charging if it reaches target within this many hours
    #[serde(default = "default_pv_only_max_hours")]
    pub pv_only_max_hours: f32,

    /// House load considered "low" for the PV-only preference (W)
    #[serde(default = "default_low_house_load_w")]
    pub low_house_load_w: f32,

    /// Base patience in the critical tier (hours)
    #[serde(default = "default_critical_base_wait_hours")]
    pub critical_base_wait_hours: f32,

    #[serde(default = "default_min_wait_hours")]
    pub min_wait_hours: f32,

    #[serde(default = "default_max_wait_hours")]
    pub max_wait_hours: f32,

    /// Waiting is only worth it above this saving
    #[serde(default = "default_min_savings_percent")]
    pub min_savings_percent: f32,

    /// SOC at which the hard boundary hold applies
    #[serde(default = "default_boundary_soc")]
    pub boundary_soc: f32,

    /// Price above which the boundary hold waits
    #[serde(default = "default_boundary_high_price")]
    pub boundary_high_price: f32,

    /// Opportunistic tolerance above the cheapest upcoming price (%)
    #[serde(default = "default_tolerance_percent")]
    pub tolerance_percent: f32,

    /// Tolerance inside the low tariff zone (%)
    #[serde(default = "default_low_tariff_tolerance_percent")]
    pub low_tariff_tolerance_percent: f32,

    /// Forecast horizon searched for the cheapest price (hours)
    #[serde(default = "default_lookahead_hours")]
    pub lookahead_hours: i64,

    /// Normal tier charges at or below this percentile of prices
    #[serde(default = "default_normal_cheap_percentile")]
    pub normal_cheap_percentile: f32,

    /// PV output below this counts as poor (W)
    #[serde(default = "default_proactive_poor_pv_w")]
    pub proactive_poor_pv_w: f32,

    #[serde(default = "default_proactive_target_soc")]
    pub proactive_target_soc: f32,

    /// Proactive charging only at or below this price
    #[serde(default = "default_proactive_max_price")]
    pub proactive_max_price: f32,

    /// PV surplus over house load that suppresses grid charging (W)
    #[serde(default = "default_pv_overproduction_margin_w")]
    pub pv_overproduction_margin_w: f32,

    /// Increase over the session start price that pauses a session (%)
    #[serde(default = "default_spike_pause_percent")]
    pub spike_pause_percent: f32,

    /// Minimum session length before a non-safety stop (minutes)
    #[serde(default = "default_min_session_minutes")]
    pub min_session_minutes: i64,

    #[serde(default = "default_max_sessions_per_day")]
    pub max_sessions_per_day: u32,

    /// SOC drop required since the last session ended (%)
    #[serde(default = "default_min_discharge_depth_percent")]
    pub min_discharge_depth_percent: f32,

    /// A tracked session whose battery stopped charging is dropped after this (minutes)
    #[serde(default = "default_desync_grace_minutes")]
    pub desync_grace_minutes: i64,
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            emergency_soc: default_emergency_soc(),
            critical_soc: default_critical_soc(),
            normal_soc: default_normal_soc(),
            stop_soc: default_stop_soc(),
            target_soc: default_target_soc(),
            super_low_price: default_super_low_price(),
            pv_only_max_hours: default_pv_only_max_hours(),
            low_house_load_w: default_low_house_load_w(),
            critical_base_wait_hours: default_critical_base_wait_hours(),
            min_wait_hours: default_min_wait_hours(),
            max_wait_hours: default_max_wait_hours(),
            min_savings_percent: default_min_savings_percent(),
            boundary_soc: default_boundary_soc(),
            boundary_high_price: default_boundary_high_price(),
            tolerance_percent: default_tolerance_percent(),
            low_tariff_tolerance_percent: default_low_tariff_tolerance_percent(),
            lookahead_hours: default_lookahead_hours(),
            normal_cheap_percentile: default_normal_cheap_percentile(),
            proactive_poor_pv_w: default_proactive_poor_pv_w(),
            proactive_target_soc: default_proactive_target_soc(),
            proactive_max_price: default_proactive_max_price(),
            pv_overproduction_margin_w: default_pv_overproduction_margin_w(),
            spike_pause_percent: default_spike_pause_percent(),
            min_session_minutes: default_min_session_minutes(),
            max_sessions_per_day: default_max_sessions_per_day(),
            min_discharge_depth_percent: default_min_discharge_depth_percent(),
            desync_grace_minutes: default_desync_grace_minutes(),
        }
    }
}

fn default_emergency_soc() -> f32 {
    5.0
}
fn default_critical_soc() -> f32 {
    12.0
}
fn default_normal_soc() -> f32 {
    50.0
}
fn default_stop_soc() -> f32 {
    95.0
}
fn default_target_soc() -> f32 {
    100.0
}
fn default_super_low_price() -> f32 {
    0.15
}
fn default_pv_only_max_hours() -> f32 {
    3.0
}
fn default_low_house_load_w() -> f32 {
    1000.0
}
fn default_critical_base_wait_hours() -> f32 {
    4.0
}
fn default_min_wait_hours() -> f32 {
    1.0
}
fn default_max_wait_hours() -> f32 {
    12.0
}
fn default_min_savings_percent() -> f32 {
    30.0
}
fn default_boundary_soc() -> f32 {
    10.0
}
fn default_boundary_high_price() -> f32 {
    1.00
}
fn default_tolerance_percent() -> f32 {
    15.0
}
fn default_low_tariff_tolerance_percent() -> f32 {
    25.0
}
fn default_lookahead_hours() -> i64 {
    12
}
fn default_normal_cheap_percentile() -> f32 {
    25.0
}
fn default_proactive_poor_pv_w() -> f32 {
    300.0
}
fn default_proactive_target_soc() -> f32 {
    80.0
}
fn default_proactive_max_price() -> f32 {
    0.60
}
fn default_pv_overproduction_margin_w() -> f32 {
    500.0
}
fn default_spike_pause_percent() -> f32 {
    50.0
}
fn default_min_session_minutes() -> i64 {
    20
}
fn default_max_sessions_per_day() -> u32 {
    3
}
fn default_min_discharge_depth_percent() -> f32 {
    10.0
}
fn default_desync_grace_minutes() -> i64 {
    10
}

// ============= Selling =============

/// Discharge-to-grid gating and safety settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellingConfig {
    /// Selling only starts at or above this SOC
    #[serde(default = "default_min_selling_soc")]
    pub min_selling_soc: f32,

    /// Discharge never goes below this SOC
    #[serde(default = "default_safety_margin_soc")]
    pub safety_margin_soc: f32,

    #[serde(default = "default_max_daily_cycles")]
    pub max_daily_cycles: u32,

    #[serde(default = "default_min_battery_temp_c")]
    pub min_battery_temp_c: f32,

    #[serde(default = "default_max_battery_temp_c")]
    pub max_battery_temp_c: f32,

    #[serde(default = "default_min_grid_voltage_v")]
    pub min_grid_voltage_v: f32,

    #[serde(default = "default_max_grid_voltage_v")]
    pub max_grid_voltage_v: f32,

    /// Local hour when the no-selling night window starts
    #[serde(default = "default_night_start_hour")]
    pub night_start_hour: u32,

    /// Local hour when the no-selling night window ends
    #[serde(default = "default_night_end_hour")]
    pub night_end_hour: u32,

    /// Multipliers applied to the rolling average to get the minimum sell price
    #[serde(default = "default_sell_seasons")]
    pub seasons: Vec<SeasonConfig>,

    /// Rolling average window for the minimum sell price (hours)
    #[serde(default = "default_average_window_hours")]
    pub average_window_hours: i64,

    /// Minimum sell price while the price history is insufficient
    #[serde(default = "default_fallback_min_sell_price")]
    pub fallback_min_sell_price: f32,
}

impl Default for SellingConfig {
    fn default() -> Self {
        Self {
            min_selling_soc: default_min_selling_soc(),
            safety_margin_soc: default_safety_margin_soc(),
            max_daily_cycles: default_max_daily_cycles(),
            min_battery_temp_c: default_min_battery_temp_c(),
            max_battery_temp_c: default_max_battery_temp_c(),
            min_grid_voltage_v: default_min_grid_voltage_v(),
            max_grid_voltage_v: default_max_grid_voltage_v(),
            night_start_hour: default_night_start_hour(),
            night_end_hour: default_night_end_hour(),
            seasons: default_sell_seasons(),
            average_window_hours: default_average_window_hours(),
            fallback_min_sell_price: default_fallback_min_sell_price(),
        }
    }
}

impl SellingConfig {
    /// Whether a local hour falls in the night window (which may wrap midnight)
    pub fn is_night_hour(&self, hour: u32) -> bool {
        if self.night_start_hour == self.night_end_hour {
            return false;
        }
        if self.night_start_hour > self.night_end_hour {
            hour >= self.night_start_hour || hour < self.night_end_hour
        } else {
            hour >= self.night_start_hour && hour < self.night_end_hour
        }
    }
}

fn default_min_selling_soc() -> f32 {
    80.0
}
fn default_safety_margin_soc() -> f32 {
    50.0
}
fn default_max_daily_cycles() -> u32 {
    2
}
fn default_min_battery_temp_c() -> f32 {
    5.0
}
fn default_max_battery_temp_c() -> f32 {
    45.0
}
fn default_min_grid_voltage_v() -> f32 {
    207.0
}
fn default_max_grid_voltage_v() -> f32 {
    253.0
}
fn default_night_start_hour() -> u32 {
    22
}
fn default_night_end_hour() -> u32 {
    6
}
fn default_sell_seasons() -> Vec<SeasonConfig> {
    vec![
        SeasonConfig::new("winter", &[11, 12, 1, 2], 1.25),
        SeasonConfig::new("summer", &[5, 6, 7, 8], 0.90),
        SeasonConfig::new("shoulder", &[3, 4, 9, 10], 1.0),
    ]
}
fn default_average_window_hours() -> i64 {
    24
}
fn default_fallback_min_sell_price() -> f32 {
    0.80
}

// ============= Scheduler =============

/// Day-ahead multi-session sell planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Peaks below this price are ignored
    #[serde(default = "default_min_peak_price")]
    pub min_peak_price: f32,

    /// Closer peaks are merged, keeping the higher one (hours)
    #[serde(default = "default_min_peak_separation_hours")]
    pub min_peak_separation_hours: f32,

    /// Percentile rank cut-offs for peak quality
    #[serde(default = "default_excellent_percentile")]
    pub excellent_percentile: f32,

    #[serde(default = "default_good_percentile")]
    pub good_percentile: f32,

    #[serde(default = "default_fair_percentile")]
    pub fair_percentile: f32,

    #[serde(default = "default_scheduler_max_sessions")]
    pub max_sessions_per_day: usize,

    #[serde(default = "default_session_duration_minutes")]
    pub session_duration_minutes: i64,

    /// Local evening peak window [start, end)
    #[serde(default = "default_evening_start_hour")]
    pub evening_start_hour: u32,

    #[serde(default = "default_evening_end_hour")]
    pub evening_end_hour: u32,

    /// Give evening peaks priority during allocation
    #[serde(default = "default_true")]
    pub reserve_evening_peak: bool,

    /// Regenerate the plan if the forecast maximum moves by more than this (%)
    #[serde(default = "default_regenerate_change_percent")]
    pub regenerate_change_percent: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_peak_price: default_min_peak_price(),
            min_peak_separation_hours: default_min_peak_separation_hours(),
            excellent_percentile: default_excellent_percentile(),
            good_percentile: default_good_percentile(),
            fair_percentile: default_fair_percentile(),
            max_sessions_per_day: default_scheduler_max_sessions(),
            session_duration_minutes: default_session_duration_minutes(),
            evening_start_hour: default_evening_start_hour(),
            evening_end_hour: default_evening_end_hour(),
            reserve_evening_peak: true,
            regenerate_change_percent: default_regenerate_change_percent(),
        }
    }
}

impl SchedulerConfig {
    pub fn is_evening_hour(&self, hour: u32) -> bool {
        hour >= self.evening_start_hour && hour < self.evening_end_hour
    }
}

fn default_min_peak_price() -> f32 {
    0.80
}
fn default_min_peak_separation_hours() -> f32 {
    2.0
}
fn default_excellent_percentile() -> f32 {
    95.0
}
fn default_good_percentile() -> f32 {
    85.0
}
fn default_fair_percentile() -> f32 {
    75.0
}
fn default_scheduler_max_sessions() -> usize {
    3
}
fn default_session_duration_minutes() -> i64 {
    60
}
fn default_evening_start_hour() -> u32 {
    17
}
fn default_evening_end_hour() -> u32 {
    21
}
fn default_true() -> bool {
    true
}
fn default_regenerate_change_percent() -> f32 {
    10.0
}

// ============= Loading & Validation =============

impl SystemConfig {
    /// Load configuration from the first available source:
    /// `$GRIDSAGE_CONFIG`, `config.toml`, `config.json`, then defaults with environment overrides.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let config = Self::from_file(&path)?;
            info!("Loaded configuration from {}", path);
            return Ok(config);
        }

        if Path::new("config.toml").exists() {
            let config = Self::from_file("config.toml")?;
            info!("Loaded configuration from config.toml");
            return Ok(config);
        }

        if Path::new("config.json").exists() {
            let config = Self::from_file("config.json")?;
            info!("Loaded configuration from config.json");
            return Ok(config);
        }

        warn!("No configuration file found, using defaults with environment overrides");
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML or JSON file (chosen by extension, TOML otherwise)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SystemConfig = toml::from_str(content).context("Invalid TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: SystemConfig =
            serde_json::from_str(content).context("Invalid JSON configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `GRIDSAGE_*` environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(tz) = std::env::var("GRIDSAGE_TIMEZONE") {
            config.system.timezone = tz;
        }

        if let Ok(dir) = std::env::var("GRIDSAGE_DATA_DIR") {
            config.system.data_dir = dir;
        }

        if let Ok(interval) = std::env::var("GRIDSAGE_DECISION_INTERVAL_SECS")
            && let Ok(secs) = interval.parse::<u64>()
        {
            config.system.decision_interval_secs = secs;
        }

        config
    }

    /// Configured timezone, `Europe/Warsaw` if the name does not parse
    pub fn tz(&self) -> Tz {
        self.system.timezone.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown timezone '{}', falling back to Europe/Warsaw",
                self.system.timezone
            );
            chrono_tz::Europe::Warsaw
        })
    }

    /// Full path of the price cache file
    pub fn price_cache_path(&self) -> std::path::PathBuf {
        Path::new(&self.system.data_dir).join(&self.price_history.cache_file)
    }

    /// Validate once at load time
    pub fn validate(&self) -> Result<()> {
        if self.system.timezone.parse::<Tz>().is_err() {
            anyhow::bail!("Invalid timezone '{}'", self.system.timezone);
        }
        if self.system.decision_interval_secs == 0 {
            anyhow::bail!("decision_interval_secs must be greater than 0");
        }

        let b = &self.battery;
        if b.capacity_kwh <= 0.0 {
            anyhow::bail!("battery.capacity_kwh must be positive, got {}", b.capacity_kwh);
        }
        if b.max_charge_rate_kw <= 0.0 || b.max_discharge_rate_kw <= 0.0 {
            anyhow::bail!("battery charge/discharge rates must be positive");
        }
        for (name, eff) in [
            ("charge_efficiency", b.charge_efficiency),
            ("discharge_efficiency", b.discharge_efficiency),
        ] {
            if !(eff > 0.0 && eff <= 1.0) {
                anyhow::bail!("battery.{} must be in (0, 1], got {}", name, eff);
            }
        }

        let h = &self.price_history;
        if h.lookback_days == 0 || h.samples_per_day == 0 {
            anyhow::bail!("price_history lookback_days and samples_per_day must be positive");
        }
        if h.flush_every == 0 {
            anyhow::bail!("price_history.flush_every must be positive");
        }

        let t = &self.thresholds;
        if t.high_multiplier <= 0.0 || t.critical_multiplier <= 0.0 {
            anyhow::bail!("threshold multipliers must be positive");
        }
        if !(0.0..=100.0).contains(&t.high_percentile)
            || !(0.0..=100.0).contains(&t.critical_percentile)
        {
            anyhow::bail!("threshold percentiles must be in 0-100");
        }
        if t.critical_percentile > t.high_percentile {
            anyhow::bail!(
                "critical_percentile ({}) must not exceed high_percentile ({})",
                t.critical_percentile,
                t.high_percentile
            );
        }
        validate_seasons("thresholds", &t.seasons)?;

        let s = &self.spike;
        if s.history_capacity == 0 || s.min_price_samples == 0 {
            anyhow::bail!("spike history_capacity and min_price_samples must be positive");
        }
        if !(s.moderate_spike_percent <= s.high_spike_percent
            && s.high_spike_percent <= s.extreme_spike_percent)
        {
            anyhow::bail!("spike percents must satisfy moderate <= high <= extreme");
        }

        let c = &self.charging;
        if !(c.emergency_soc < c.critical_soc
            && c.critical_soc < c.normal_soc
            && c.normal_soc <= c.stop_soc
            && c.stop_soc <= 100.0
            && c.target_soc <= 100.0)
        {
            anyhow::bail!(
                "charging SOC cut-offs must satisfy emergency ({}) < critical ({}) < normal ({}) <= stop ({}) <= 100",
                c.emergency_soc,
                c.critical_soc,
                c.normal_soc,
                c.stop_soc
            );
        }
        if c.min_wait_hours > c.max_wait_hours {
            anyhow::bail!("charging.min_wait_hours must not exceed max_wait_hours");
        }
        if c.lookahead_hours <= 0 {
            anyhow::bail!("charging.lookahead_hours must be positive");
        }
        if c.max_sessions_per_day == 0 {
            anyhow::bail!("charging.max_sessions_per_day must be at least 1");
        }

        let sell = &self.selling;
        if sell.safety_margin_soc >= sell.min_selling_soc {
            anyhow::bail!(
                "selling.safety_margin_soc ({}) must be below min_selling_soc ({})",
                sell.safety_margin_soc,
                sell.min_selling_soc
            );
        }
        if sell.min_battery_temp_c >= sell.max_battery_temp_c {
            anyhow::bail!("selling battery temperature window is empty");
        }
        if sell.min_grid_voltage_v >= sell.max_grid_voltage_v {
            anyhow::bail!("selling grid voltage window is empty");
        }
        if sell.night_start_hour > 23 || sell.night_end_hour > 23 {
            anyhow::bail!("selling night hours must be 0-23");
        }
        validate_seasons("selling", &sell.seasons)?;

        let sch = &self.scheduler;
        if !(sch.fair_percentile <= sch.good_percentile
            && sch.good_percentile <= sch.excellent_percentile
            && sch.excellent_percentile <= 100.0)
        {
            anyhow::bail!("scheduler percentile cut-offs must satisfy fair <= good <= excellent <= 100");
        }
        if sch.session_duration_minutes <= 0 {
            anyhow::bail!("scheduler.session_duration_minutes must be positive");
        }
        if sch.evening_start_hour > sch.evening_end_hour || sch.evening_end_hour > 24 {
            anyhow::bail!("scheduler evening window is invalid");
        }

        Ok(())
    }
}

fn validate_seasons(section: &str, seasons: &[SeasonConfig]) -> Result<()> {
    for season in seasons {
        if season.months.is_empty() {
            anyhow::bail!("{}: season '{}' has no months", section, season.name);
        }
        if let Some(month) = season.months.iter().find(|m| !(1..=12).contains(*m)) {
            anyhow::bail!(
                "{}: season '{}' has invalid month {}",
                section,
                season.name,
                month
            );
        }
        if season.multiplier <= 0.0 {
            anyhow::bail!("{}: season '{}' multiplier must be positive", section, season.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.price_history.capacity(), 7 * 96);
        assert_eq!(config.tz(), chrono_tz::Europe::Warsaw);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SystemConfig::from_toml_str(
            r#"
            [charging]
            stop_soc = 90.0

            [thresholds]
            method = "percentile"
            "#,
        )
        .unwrap();

        assert_eq!(config.charging.stop_soc, 90.0);
        assert_eq!(config.charging.emergency_soc, 5.0);
        assert_eq!(config.thresholds.method, ThresholdMethod::Percentile);
        assert_eq!(config.thresholds.seasons.len(), 3);
    }

    #[test]
    fn test_invalid_soc_ordering_rejected() {
        let mut config = SystemConfig::default();
        config.charging.critical_soc = 60.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_season_month_rejected() {
        let mut config = SystemConfig::default();
        config.thresholds.seasons = vec![SeasonConfig::new("odd", &[13], 1.0)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_safety_margin_must_be_below_min_selling_soc() {
        let mut config = SystemConfig::default();
        config.selling.safety_margin_soc = 85.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_night_window_wraps_midnight() {
        let selling = SellingConfig::default();
        assert!(selling.is_night_hour(23));
        assert!(selling.is_night_hour(2));
        assert!(!selling.is_night_hour(6));
        assert!(!selling.is_night_hour(18));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"selling": {{"min_selling_soc": 85.0}}}}"#).unwrap();

        let config = SystemConfig::from_file(file.path()).unwrap();
        assert_eq!(config.selling.min_selling_soc, 85.0);
        assert_eq!(config.scheduler.max_sessions_per_day, 3);
    }

    #[test]
    fn test_season_lookup() {
        let seasons = ThresholdConfig::default().seasons;
        assert_eq!(season_for_month(&seasons, 11).map(|s| s.name.as_str()), Some("winter"));
        assert_eq!(season_for_month(&seasons, 7).map(|s| s.name.as_str()), Some("summer"));
        assert!(season_for_month(&[], 7).is_none());
    }
}
