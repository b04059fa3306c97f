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
use gridsage_types::pricing::forecast_window;
use gridsage_types::{ChargeDecision, ChargeSource, ChargingTier, DecisionReason, PriceSample};
use tracing::{debug, trace};

use super::{ChargingDecisionEngine, ChargingInputs};
use crate::pricing::statistics::{percentile_sorted, sorted};

/// How close to the boundary SOC counts as "at" the boundary
const BOUNDARY_SOC_EPSILON: f32 = 0.05;

/// Cheapest forecast sample in `[now, now + hours)`
pub fn cheapest_in_window(
    forecast: &[PriceSample],
    now: DateTime<Utc>,
    hours: i64,
) -> Option<PriceSample> {
    forecast_window(forecast, now, hours)
        .into_iter()
        .min_by(|a, b| a.price.total_cmp(&b.price))
}

fn savings_multiplier(savings_percent: f32) -> f32 {
    if savings_percent < 40.0 {
        1.0
    } else if savings_percent < 60.0 {
        1.5
    } else if savings_percent < 80.0 {
        2.0
    } else {
        2.5
    }
}

impl ChargingDecisionEngine {
    /// Tier policy for a battery without a running session. First match wins.
    pub fn evaluate_tiers(&self, inputs: &ChargingInputs<'_>) -> ChargeDecision {
        let cfg = &self.config;
        let soc = inputs.battery.soc();
        let price = inputs.price;

        if soc < cfg.emergency_soc {
            return self.charge(
                inputs,
                ChargingTier::Emergency,
                ChargeSource::Grid,
                cfg.stop_soc,
                DecisionReason::Emergency {
                    soc,
                    threshold: cfg.emergency_soc,
                },
                1.0,
            );
        }

        let surplus = inputs.power.net_power_w();
        if inputs.power.is_pv_surplus(cfg.pv_overproduction_margin_w) {
            debug!("PV surplus {:.0} W suppresses grid charging", surplus);
            return ChargeDecision::idle(
                DecisionReason::PvOverproduction { surplus_w: surplus },
                0.9,
                price,
            );
        }

        if price <= cfg.super_low_price && soc < cfg.target_soc {
            return self.super_low_tier(inputs);
        }

        if soc < cfg.critical_soc {
            self.critical_tier(inputs)
        } else if soc < cfg.normal_soc {
            self.opportunistic_tier(inputs)
        } else {
            self.normal_tier(inputs)
        }
    }

    fn super_low_tier(&self, inputs: &ChargingInputs<'_>) -> ChargeDecision {
        let cfg = &self.config;
        let soc = inputs.battery.soc();
        let net_w = inputs.power.net_power_w();

        let pv_hours = if net_w > 0.0 {
            self.battery.energy_between(soc, cfg.target_soc) / (net_w / 1000.0)
        } else {
            f32::INFINITY
        };

        let solar_can_do_it = pv_hours <= cfg.pv_only_max_hours
            && inputs.pv_outlook.reliable
            && inputs.power.house_load_w <= cfg.low_house_load_w;

        if solar_can_do_it {
            return self.charge(
                inputs,
                ChargingTier::SuperLow,
                ChargeSource::Pv,
                cfg.target_soc,
                DecisionReason::SuperLowPvPreferred {
                    price: inputs.price,
                    pv_hours,
                },
                0.8,
            );
        }

        self.charge(
            inputs,
            ChargingTier::SuperLow,
            ChargeSource::Grid,
            cfg.target_soc,
            DecisionReason::SuperLowPrice {
                price: inputs.price,
                threshold: cfg.super_low_price,
            },
            0.95,
        )
    }

    fn critical_tier(&self, inputs: &ChargingInputs<'_>) -> ChargeDecision {
        let cfg = &self.config;
        let soc = inputs.battery.soc();
        let price = inputs.price;

        if price <= inputs.thresholds.critical_price {
            return self.charge(
                inputs,
                ChargingTier::Critical,
                ChargeSource::Grid,
                cfg.stop_soc,
                DecisionReason::CriticalAcceptablePrice {
                    price,
                    threshold: inputs.thresholds.critical_price,
                },
                0.9,
            );
        }

        // Fixed hold at the boundary SOC, independent of the dynamic wait below
        if (soc - cfg.boundary_soc).abs() < BOUNDARY_SOC_EPSILON && price > cfg.boundary_high_price
        {
            return Self::wait(
                inputs,
                ChargingTier::Critical,
                DecisionReason::CriticalBoundaryHold {
                    soc,
                    price,
                    limit: cfg.boundary_high_price,
                },
                0.7,
            );
        }

        let Some(cheapest) = cheapest_in_window(inputs.forecast, inputs.now, cfg.lookahead_hours)
        else {
            // Nothing to wait for
            return self.charge(
                inputs,
                ChargingTier::Critical,
                ChargeSource::Grid,
                cfg.stop_soc,
                DecisionReason::CriticalChargeAnyway {
                    hours_until_cheapest: 0.0,
                    max_wait_hours: self.dynamic_max_wait_hours(0.0, soc),
                    savings_percent: 0.0,
                },
                0.6,
            );
        };

        let savings_percent = if price > 0.0 {
            (price - cheapest.price) / price * 100.0
        } else {
            0.0
        };
        let hours_until_cheapest =
            ((cheapest.timestamp - inputs.now).num_minutes() as f32 / 60.0).max(0.0);
        let max_wait_hours = self.dynamic_max_wait_hours(savings_percent, soc);

        trace!(
            "Critical tier: cheapest {:.3} in {:.1} h, saving {:.0}%, max wait {:.1} h",
            cheapest.price,
            hours_until_cheapest,
            savings_percent,
            max_wait_hours
        );

        if hours_until_cheapest <= max_wait_hours && savings_percent >= cfg.min_savings_percent {
            Self::wait(
                inputs,
                ChargingTier::Critical,
                DecisionReason::CriticalWaiting {
                    hours_until_cheapest,
                    max_wait_hours,
                    savings_percent,
                },
                0.7,
            )
        } else {
            self.charge(
                inputs,
                ChargingTier::Critical,
                ChargeSource::Grid,
                cfg.stop_soc,
                DecisionReason::CriticalChargeAnyway {
                    hours_until_cheapest,
                    max_wait_hours,
                    savings_percent,
                },
                0.8,
            )
        }
    }

    /// Tolerated wait (hours) in the critical tier.
    ///
    /// Grows with the expected saving, shrinks as SOC approaches the emergency level, clamped to
    /// the configured bounds.
    pub fn dynamic_max_wait_hours(&self, savings_percent: f32, soc: f32) -> f32 {
        let cfg = &self.config;
        let span = (cfg.critical_soc - cfg.emergency_soc).max(f32::EPSILON);
        let position = ((soc - cfg.emergency_soc) / span).clamp(0.0, 1.0);
        let battery_multiplier = if position >= 0.7 {
            1.0
        } else if position >= 0.4 {
            0.75
        } else {
            0.5
        };

        (cfg.critical_base_wait_hours * savings_multiplier(savings_percent) * battery_multiplier)
            .clamp(cfg.min_wait_hours, cfg.max_wait_hours)
    }

    fn opportunistic_tier(&self, inputs: &ChargingInputs<'_>) -> ChargeDecision {
        let cfg = &self.config;
        let soc = inputs.battery.soc();
        let price = inputs.price;

        let in_low_zone = inputs.tariff.is_some_and(|t| t.is_low_cost());

        if let Some(tariff) = inputs.tariff
            && tariff.is_low_cost()
        {
            let needed_minutes =
                (self.battery.hours_to_charge(soc, cfg.stop_soc) * 60.0).ceil() as i64;
            if tariff.remaining_minutes < needed_minutes {
                return self.charge(
                    inputs,
                    ChargingTier::Opportunistic,
                    ChargeSource::Grid,
                    cfg.stop_soc,
                    DecisionReason::TariffDeadline {
                        remaining_minutes: tariff.remaining_minutes,
                        needed_minutes,
                    },
                    0.85,
                );
            }
        }

        let Some(cheapest) = cheapest_in_window(inputs.forecast, inputs.now, cfg.lookahead_hours)
        else {
            return Self::wait(
                inputs,
                ChargingTier::Opportunistic,
                DecisionReason::InsufficientData {
                    missing: "price forecast".to_owned(),
                },
                0.5,
            );
        };

        let tolerance_percent = if in_low_zone {
            cfg.low_tariff_tolerance_percent
        } else {
            cfg.tolerance_percent
        };

        if price <= cheapest.price * (1.0 + tolerance_percent / 100.0) {
            self.charge(
                inputs,
                ChargingTier::Opportunistic,
                ChargeSource::Grid,
                cfg.stop_soc,
                DecisionReason::WithinTolerance {
                    price,
                    cheapest: cheapest.price,
                    tolerance_percent,
                },
                0.8,
            )
        } else {
            Self::wait(
                inputs,
                ChargingTier::Opportunistic,
                DecisionReason::AboveTolerance {
                    price,
                    cheapest: cheapest.price,
                    tolerance_percent,
                },
                0.75,
            )
        }
    }

    fn normal_tier(&self, inputs: &ChargingInputs<'_>) -> ChargeDecision {
        let cfg = &self.config;
        let soc = inputs.battery.soc();
        let price = inputs.price;

        if soc >= cfg.stop_soc {
            return Self::wait(
                inputs,
                ChargingTier::Normal,
                DecisionReason::TargetReached {
                    soc,
                    stop_soc: cfg.stop_soc,
                },
                1.0,
            );
        }

        let cheap_threshold = if inputs.stats.is_empty() {
            let forecast_prices: Vec<f32> = inputs.forecast.iter().map(|s| s.price).collect();
            (!forecast_prices.is_empty()).then(|| {
                percentile_sorted(&sorted(&forecast_prices), cfg.normal_cheap_percentile / 100.0)
            })
        } else {
            Some(inputs.stats.percentile(cfg.normal_cheap_percentile))
        };

        if let Some(threshold) = cheap_threshold
            && price <= threshold
        {
            return self.charge(
                inputs,
                ChargingTier::Normal,
                ChargeSource::Grid,
                cfg.stop_soc,
                DecisionReason::CheapWindow { price, threshold },
                0.75,
            );
        }

        let pv_power_w = inputs.power.pv_power_w;
        if pv_power_w < cfg.proactive_poor_pv_w
            && !inputs.pv_outlook.improving_soon
            && soc < cfg.proactive_target_soc
            && price <= cfg.proactive_max_price
        {
            return self.charge(
                inputs,
                ChargingTier::Normal,
                ChargeSource::Grid,
                cfg.proactive_target_soc,
                DecisionReason::ProactiveCharge { pv_power_w, price },
                0.6,
            );
        }

        Self::wait(
            inputs,
            ChargingTier::Normal,
            DecisionReason::BatterySufficient { soc },
            0.9,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use gridsage_types::{
        AdaptiveThresholds, BatterySnapshot, PowerFlowSnapshot, PriceStatistics, PvOutlook,
        SystemConfig, TariffWindow, TariffZone,
    };

    struct Fixture {
        engine: ChargingDecisionEngine,
        now: DateTime<Utc>,
        thresholds: AdaptiveThresholds,
        stats: PriceStatistics,
        forecast: Vec<PriceSample>,
        power: PowerFlowSnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            let now = Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap();
            Self {
                engine: ChargingDecisionEngine::new(&SystemConfig::default()),
                now,
                thresholds: AdaptiveThresholds {
                    high_price: 0.90,
                    critical_price: 0.70,
                    season: "winter".to_owned(),
                    seasonal_multiplier: 1.3,
                    used_fallback: false,
                },
                stats: PriceStatistics::empty(),
                forecast: Vec::new(),
                power: PowerFlowSnapshot {
                    house_load_w: 800.0,
                    ..Default::default()
                },
            }
        }

        /// Flat forecast with one cheaper hour `cheap_in_hours` from now
        fn with_cheap_hour(mut self, base: f32, cheap: f32, cheap_in_hours: i64) -> Self {
            self.forecast = (0..24)
                .map(|h| {
                    let price = if h == cheap_in_hours { cheap } else { base };
                    PriceSample::new(self.now + Duration::hours(h), price)
                })
                .collect();
            self
        }

        fn decide(&self, soc: f32, price: f32, tariff: Option<TariffWindow>) -> ChargeDecision {
            let battery = BatterySnapshot::new(soc, self.now);
            self.engine.evaluate_tiers(&ChargingInputs {
                now: self.now,
                battery: &battery,
                power: &self.power,
                price,
                thresholds: &self.thresholds,
                stats: &self.stats,
                forecast: &self.forecast,
                tariff,
                pv_outlook: PvOutlook::default(),
            })
        }
    }

    #[test]
    fn test_emergency_always_charges() {
        let mut fixture = Fixture::new();
        fixture.power.pv_power_w = 5000.0;
        let decision = fixture.decide(3.0, 3.0, None);
        assert!(decision.should_charge);
        assert_eq!(decision.tier, Some(ChargingTier::Emergency));
        assert_eq!(decision.source, Some(ChargeSource::Grid));
    }

    #[test]
    fn test_pv_overproduction_suppresses_grid() {
        let mut fixture = Fixture::new();
        fixture.power.pv_power_w = 2000.0;
        let decision = fixture.decide(30.0, 0.10, None);
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "pv_overproduction");
    }

    #[test]
    fn test_super_low_price_fills_from_grid() {
        let fixture = Fixture::new();
        let decision = fixture.decide(70.0, 0.10, None);
        assert!(decision.should_charge);
        assert_eq!(decision.target_soc, Some(100.0));
        assert_eq!(decision.reason.tag(), "super_low_price");
        assert!(decision.estimated_energy_kwh > 2.9);
    }

    #[test]
    fn test_critical_acceptable_price_charges() {
        let fixture = Fixture::new().with_cheap_hour(0.60, 0.20, 3);
        let decision = fixture.decide(8.0, 0.60, None);
        assert!(decision.should_charge);
        assert_eq!(decision.reason.tag(), "critical_acceptable_price");
    }

    #[test]
    fn test_critical_waits_for_large_saving() {
        let fixture = Fixture::new().with_cheap_hour(1.00, 0.30, 3);
        let decision = fixture.decide(11.0, 1.00, None);
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "critical_waiting");
    }

    #[test]
    fn test_critical_patience_is_bounded() {
        // 70% saving but 11 hours away; near-emergency SOC halves the tolerated wait
        let fixture = Fixture::new().with_cheap_hour(1.00, 0.30, 11);
        let decision = fixture.decide(6.0, 0.95, None);
        assert!(decision.should_charge);
        assert_eq!(decision.reason.tag(), "critical_charge_anyway");
    }

    #[test]
    fn test_boundary_hold_at_ten_percent() {
        // Saving is too small for the dynamic rule to wait, yet the boundary hold does
        let fixture = Fixture::new().with_cheap_hour(1.10, 1.00, 2);
        let decision = fixture.decide(10.0, 1.10, None);
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "critical_boundary_hold");

        let decision = fixture.decide(11.0, 1.10, None);
        assert!(decision.should_charge);
    }

    #[test]
    fn test_dynamic_wait_bounds() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        assert!((engine.dynamic_max_wait_hours(20.0, 11.5) - 4.0).abs() < 1e-6);
        assert!((engine.dynamic_max_wait_hours(90.0, 11.5) - 10.0).abs() < 1e-6);
        assert!((engine.dynamic_max_wait_hours(50.0, 5.5) - 3.0).abs() < 1e-6);
        assert!(engine.dynamic_max_wait_hours(100.0, 12.0) <= 12.0);
    }

    #[test]
    fn test_opportunistic_tolerance() {
        let fixture = Fixture::new().with_cheap_hour(0.80, 0.50, 4);
        assert!(fixture.decide(30.0, 0.55, None).should_charge);

        let decision = fixture.decide(30.0, 0.60, None);
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "above_tolerance");

        // Wider tolerance in the low tariff zone
        let low = TariffWindow {
            zone: TariffZone::Low,
            remaining_minutes: 600,
        };
        assert!(fixture.decide(30.0, 0.60, Some(low)).should_charge);
    }

    #[test]
    fn test_tariff_deadline_overrides_tolerance() {
        let fixture = Fixture::new().with_cheap_hour(0.80, 0.30, 4);
        let closing = TariffWindow {
            zone: TariffZone::Low,
            remaining_minutes: 30,
        };
        let decision = fixture.decide(30.0, 0.80, Some(closing));
        assert!(decision.should_charge);
        assert_eq!(decision.reason.tag(), "tariff_deadline");
    }

    #[test]
    fn test_opportunistic_without_forecast_waits() {
        let fixture = Fixture::new();
        let decision = fixture.decide(30.0, 0.40, None);
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "insufficient_data");
    }

    #[test]
    fn test_normal_tier_cheap_window_and_proactive() {
        let mut fixture = Fixture::new();
        fixture.stats = crate::pricing::statistics::compute_statistics(&[0.3, 0.5, 0.7, 0.9, 1.1]);

        let decision = fixture.decide(60.0, 0.45, None);
        assert_eq!(decision.reason.tag(), "cheap_window");

        let decision = fixture.decide(60.0, 0.58, None);
        assert_eq!(decision.reason.tag(), "proactive_charge");
        assert_eq!(decision.target_soc, Some(80.0));

        let decision = fixture.decide(85.0, 0.58, None);
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "battery_sufficient");

        let decision = fixture.decide(96.0, 0.20, None);
        assert_eq!(decision.reason.tag(), "target_reached");
    }
}
