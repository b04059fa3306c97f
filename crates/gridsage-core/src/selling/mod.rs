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

//! Discharge-to-grid policy and day-ahead sell planning.

mod safety;
mod scheduler;

pub use safety::{SafetyReport, safety_report};
pub use scheduler::SellingScheduler;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use gridsage_types::config::{BatteryConfig, SellingConfig, season_for_month};
use gridsage_types::{
    BatterySnapshot, DecisionReason, PowerFlowSnapshot, SellDecision, SessionKind, SessionRecord,
    SessionTransition, Spike, SystemConfig,
};
use tracing::{debug, info, warn};

use crate::pricing::PriceHistoryManager;
use crate::state::{ActiveSell, SellingState};

/// Everything the selling engine looks at in one cycle
#[derive(Debug, Clone, Copy)]
pub struct SellingInputs<'a> {
    pub now: DateTime<Utc>,
    pub battery: &'a BatterySnapshot,
    pub power: &'a PowerFlowSnapshot,
    pub price: f32,

    /// Dynamic minimum sell price for this cycle
    pub min_sell_price: f32,

    /// Spike still inside its active window, if any
    pub active_spike: Option<&'a Spike>,
}

/// Decides whether the battery discharges to the grid
#[derive(Debug, Clone)]
pub struct SellingDecisionEngine {
    config: SellingConfig,
    battery: BatteryConfig,
    tz: Tz,
}

impl SellingDecisionEngine {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            config: config.selling.clone(),
            battery: config.battery.clone(),
            tz: config.tz(),
        }
    }

    pub fn config(&self) -> &SellingConfig {
        &self.config
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Rolling average price times the seasonal sell multiplier.
    ///
    /// Falls back to the configured constant while the history is too thin.
    pub fn dynamic_min_sell_price(&self, history: &PriceHistoryManager, now: DateTime<Utc>) -> f32 {
        let average = if history.has_sufficient_data() {
            history.rolling_average_at(now, self.config.average_window_hours)
        } else {
            None
        };

        let Some(average) = average.filter(|a| *a > 0.0) else {
            debug!(
                "Price history insufficient, minimum sell price falls back to {:.3}",
                self.config.fallback_min_sell_price
            );
            return self.config.fallback_min_sell_price;
        };

        let month = now.with_timezone(&self.tz).month();
        let multiplier = season_for_month(&self.config.seasons, month).map_or(1.0, |s| s.multiplier);
        average * multiplier
    }

    pub fn safety_report(
        &self,
        battery: &BatterySnapshot,
        power: &PowerFlowSnapshot,
        now: DateTime<Utc>,
    ) -> SafetyReport {
        safety_report(&self.config, self.tz, battery, power, now)
    }

    /// Decide for this cycle without touching state
    pub fn evaluate(&self, state: &SellingState, inputs: &SellingInputs<'_>) -> SellDecision {
        let today = self.local_date(inputs.now);
        if let Some(active) = state.active_on(today) {
            return self.evaluate_active(active, inputs);
        }

        let cfg = &self.config;
        let soc = inputs.battery.soc();
        let price = inputs.price;

        let cycles = state.cycles_on(today);
        if cycles >= cfg.max_daily_cycles {
            return SellDecision::hold(
                DecisionReason::MaxCycles {
                    cycles,
                    max: cfg.max_daily_cycles,
                },
                price,
            );
        }

        if soc < cfg.min_selling_soc {
            return SellDecision::hold(
                DecisionReason::SocBelowSellMinimum {
                    soc,
                    min_soc: cfg.min_selling_soc,
                },
                price,
            );
        }

        let report = self.safety_report(inputs.battery, inputs.power, inputs.now);
        if !report.passed() {
            return SellDecision::hold(
                DecisionReason::SafetyBlocked {
                    failures: report.failures,
                },
                price,
            );
        }

        if let Some(spike) = inputs.active_spike
            && spike.level.is_sell_trigger()
            && price >= inputs.min_sell_price
        {
            return self.start(
                inputs,
                None,
                cfg.safety_margin_soc,
                DecisionReason::SpikeSell {
                    level: spike.level,
                    price,
                    increase_percent: spike.percent_increase,
                },
                spike.confidence,
            );
        }

        let due = state.plan.as_ref().and_then(|plan| {
            plan.session_at(inputs.now)
                .filter(|s| !state.completed_sessions.contains(&s.id))
        });
        let Some(session) = due else {
            return SellDecision::hold(DecisionReason::NoSellOpportunity, price);
        };

        if price < inputs.min_sell_price {
            return SellDecision::hold(
                DecisionReason::BelowMinSellPrice {
                    price,
                    min_price: inputs.min_sell_price,
                },
                price,
            );
        }

        let target = session.target_end_soc.max(cfg.safety_margin_soc);
        if soc <= target {
            return SellDecision::hold(
                DecisionReason::SafetyMarginReached { soc, floor: target },
                price,
            );
        }

        self.start(
            inputs,
            Some(session.id.clone()),
            target,
            DecisionReason::ScheduledSell {
                session_id: session.id.clone(),
                price,
            },
            session.confidence,
        )
    }

    fn evaluate_active(&self, active: &ActiveSell, inputs: &SellingInputs<'_>) -> SellDecision {
        let soc = inputs.battery.soc();
        let price = inputs.price;
        let floor = active.target_soc.max(self.config.safety_margin_soc);
        let stop = |reason: DecisionReason| {
            SellDecision {
                session_id: active.session_id.clone(),
                ..SellDecision::hold(reason, price)
            }
            .with_transition(SessionTransition::Stop)
        };

        if soc <= floor {
            return stop(DecisionReason::SafetyMarginReached { soc, floor });
        }

        let report = self.safety_report(inputs.battery, inputs.power, inputs.now);
        if !report.passed() {
            return stop(DecisionReason::SafetyBlocked {
                failures: report.failures,
            });
        }

        let window_over = match active.window_end {
            Some(end) => inputs.now >= end,
            None => !inputs.active_spike.is_some_and(|s| s.level.is_sell_trigger()),
        };
        if window_over {
            return stop(DecisionReason::SellWindowEnded {
                session_id: active.session_id.clone(),
            });
        }

        if price < inputs.min_sell_price {
            return stop(DecisionReason::BelowMinSellPrice {
                price,
                min_price: inputs.min_sell_price,
            });
        }

        let mut decision = self.sell(
            inputs,
            active.session_id.clone(),
            floor,
            DecisionReason::SellContinue { soc, floor },
            0.9,
        );
        decision.transition = SessionTransition::Continue;
        decision
    }

    fn start(
        &self,
        inputs: &SellingInputs<'_>,
        session_id: Option<String>,
        target_soc: f32,
        reason: DecisionReason,
        confidence: f32,
    ) -> SellDecision {
        self.sell(inputs, session_id, target_soc, reason, confidence)
            .with_transition(SessionTransition::Start)
    }

    fn sell(
        &self,
        inputs: &SellingInputs<'_>,
        session_id: Option<String>,
        target_soc: f32,
        reason: DecisionReason,
        confidence: f32,
    ) -> SellDecision {
        let energy = self.battery.energy_between(target_soc, inputs.battery.soc());
        SellDecision {
            should_sell: true,
            reason,
            confidence,
            session_id,
            target_soc: Some(target_soc),
            power_w: self.battery.max_discharge_rate_kw * 1000.0,
            estimated_energy_kwh: energy,
            expected_revenue: energy * inputs.price * self.battery.discharge_efficiency,
            transition: SessionTransition::None,
            price: inputs.price,
        }
    }

    /// Apply the decision's session transition.
    ///
    /// Returns a record when a sell session closed.
    pub fn commit(
        &self,
        state: &mut SellingState,
        decision: &SellDecision,
        inputs: &SellingInputs<'_>,
    ) -> Option<SessionRecord> {
        let now = inputs.now;
        let soc = inputs.battery.soc();
        state.roll_over(self.local_date(now));

        match decision.transition {
            SessionTransition::Start => {
                if state.active.is_some() {
                    warn!("Sell start requested while a sell is active, ignoring");
                    return None;
                }
                state.daily_cycles += 1;
                let window_end = decision.session_id.as_ref().and_then(|id| {
                    state.completed_sessions.insert(id.clone());
                    state.plan.as_ref().and_then(|p| p.session(id)).map(|s| s.end_time())
                });
                state.active = Some(ActiveSell {
                    session_id: decision.session_id.clone(),
                    start_time: now,
                    start_soc: soc,
                    start_price: inputs.price,
                    target_soc: decision.target_soc.unwrap_or(self.config.safety_margin_soc),
                    window_end,
                });
                info!(
                    "💰 Sell cycle {}/{} started at {:.1}%: {}",
                    state.daily_cycles, self.config.max_daily_cycles, soc, decision.reason
                );
                None
            }
            SessionTransition::Stop => {
                let active = state.active.take()?;
                info!(
                    "Sell ended {:.1}% -> {:.1}%: {}",
                    active.start_soc, soc, decision.reason
                );
                Some(SessionRecord {
                    kind: SessionKind::Sell,
                    session_id: active.session_id,
                    start_time: active.start_time,
                    end_time: now,
                    start_soc: active.start_soc,
                    end_soc: soc,
                    energy_kwh: self.battery.energy_between(soc, active.start_soc),
                    start_price: active.start_price,
                    end_reason: decision.reason.to_string(),
                })
            }
            SessionTransition::None
            | SessionTransition::Continue
            | SessionTransition::Resync
            | SessionTransition::Drop => None,
        }
    }
}
