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

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currency a price is quoted in (per kWh)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    PLN,
    EUR,
    CZK,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PLN => write!(f, "PLN"),
            Self::EUR => write!(f, "EUR"),
            Self::CZK => write!(f, "CZK"),
        }
    }
}

/// Raw market tick: final price per kWh at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,

    /// Final price per kWh, inclusive of all tariff components
    pub price: f32,

    #[serde(default)]
    pub currency: Currency,
}

impl PriceSample {
    pub fn new(timestamp: DateTime<Utc>, price: f32) -> Self {
        Self {
            timestamp,
            price,
            currency: Currency::default(),
        }
    }
}

/// Distribution statistics over the rolling price window
///
/// `sample_count == 0` means "no data": every other field is zero and callers must
/// use their configured fallbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub median: f32,
    pub mean: f32,
    pub p25: f32,
    pub p50: f32,
    pub p75: f32,
    pub p90: f32,
    pub min: f32,
    pub max: f32,
    pub sample_count: usize,
}

impl PriceStatistics {
    /// All-zero statistics used when the window is empty
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Enough samples for the statistics to be trusted
    pub fn is_valid(&self, min_samples: usize) -> bool {
        self.sample_count >= min_samples && self.sample_count > 0
    }

    /// Value at one of the precomputed percentiles (25/50/75/90), nearest lower one otherwise
    pub fn percentile(&self, percent: f32) -> f32 {
        if percent >= 90.0 {
            self.p90
        } else if percent >= 75.0 {
            self.p75
        } else if percent >= 50.0 {
            self.p50
        } else if percent >= 25.0 {
            self.p25
        } else {
            self.min
        }
    }
}

/// Price thresholds derived from statistics and the calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveThresholds {
    /// Above this price charging is considered expensive
    pub high_price: f32,

    /// Ceiling for "acceptable" charging when the battery is critically low
    pub critical_price: f32,

    /// Season label whose multiplier was applied ("unknown" when none matched)
    pub season: String,

    /// Seasonal multiplier applied to both thresholds
    pub seasonal_multiplier: f32,

    /// Fallback constants were used because there were no samples
    pub used_fallback: bool,
}

// ============= Tariff Zones =============

/// Time-of-day distribution tariff band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TariffZone {
    /// Lower-cost band (e.g. night/T2)
    Low,
    /// Standard band (e.g. day/T1)
    High,
}

impl fmt::Display for TariffZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low tariff"),
            Self::High => write!(f, "high tariff"),
        }
    }
}

/// The tariff band currently in force and how long it lasts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TariffWindow {
    pub zone: TariffZone,

    /// Minutes left until the zone changes
    pub remaining_minutes: i64,
}

impl TariffWindow {
    pub fn remaining(&self) -> Duration {
        Duration::minutes(self.remaining_minutes.max(0))
    }

    pub fn is_low_cost(&self) -> bool {
        self.zone == TariffZone::Low
    }
}

/// Everything the price source collaborator hands over in one refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Current final price, if known
    pub current: Option<PriceSample>,

    /// Day-ahead forecast, ordered by time
    pub forecast: Vec<PriceSample>,

    /// Tariff band in force
    pub tariff: Option<TariffWindow>,
}

/// Forecast samples falling in `[from, from + hours)`
pub fn forecast_window(forecast: &[PriceSample], from: DateTime<Utc>, hours: i64) -> Vec<PriceSample> {
    let until = from + Duration::hours(hours);
    forecast
        .iter()
        .filter(|s| s.timestamp >= from && s.timestamp < until)
        .copied()
        .collect()
}
