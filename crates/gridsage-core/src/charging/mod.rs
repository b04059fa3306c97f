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

//! Tiered charging policy with oscillation protection.
//!
//! Policy lives in [`tiers`], session hysteresis and bookkeeping in [`session`].

mod session;
mod tiers;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use gridsage_types::config::{BatteryConfig, ChargingConfig};
use gridsage_types::{
    AdaptiveThresholds, BatterySnapshot, ChargeDecision, ChargeSource, ChargingTier,
    DecisionReason, PowerFlowSnapshot, PriceSample, PriceStatistics, PvOutlook, SystemConfig,
    TariffWindow,
};

pub use tiers::cheapest_in_window;

/// Everything the charging engine looks at in one cycle
#[derive(Debug, Clone, Copy)]
pub struct ChargingInputs<'a> {
    pub now: DateTime<Utc>,
    pub battery: &'a BatterySnapshot,
    pub power: &'a PowerFlowSnapshot,

    /// Current final price
    pub price: f32,

    pub thresholds: &'a AdaptiveThresholds,
    pub stats: &'a PriceStatistics,

    /// Day-ahead forecast ordered by time
    pub forecast: &'a [PriceSample],

    pub tariff: Option<TariffWindow>,
    pub pv_outlook: PvOutlook,
}

/// Decides whether the battery charges, from where and up to what SOC
#[derive(Debug, Clone)]
pub struct ChargingDecisionEngine {
    config: ChargingConfig,
    battery: BatteryConfig,
    tz: Tz,
}

impl ChargingDecisionEngine {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            config: config.charging.clone(),
            battery: config.battery.clone(),
            tz: config.tz(),
        }
    }

    pub fn config(&self) -> &ChargingConfig {
        &self.config
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// A charging decision towards `target_soc`
    fn charge(
        &self,
        inputs: &ChargingInputs<'_>,
        tier: ChargingTier,
        source: ChargeSource,
        target_soc: f32,
        reason: DecisionReason,
        confidence: f32,
    ) -> ChargeDecision {
        let soc = inputs.battery.soc();
        let energy = self.battery.energy_between(soc, target_soc);
        let cost = match source {
            ChargeSource::Grid => energy * inputs.price,
            ChargeSource::Pv => 0.0,
        };

        ChargeDecision {
            should_charge: true,
            reason,
            confidence,
            tier: Some(tier),
            source: Some(source),
            target_soc: Some(target_soc),
            estimated_energy_kwh: energy,
            estimated_cost: cost,
            transition: gridsage_types::SessionTransition::None,
            price: inputs.price,
        }
    }

    /// A "not now" decision attributed to `tier`
    fn wait(
        inputs: &ChargingInputs<'_>,
        tier: ChargingTier,
        reason: DecisionReason,
        confidence: f32,
    ) -> ChargeDecision {
        ChargeDecision::idle(reason, confidence, inputs.price).with_tier(tier)
    }
}
