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

use gridsage_types::{
    ChargeDecision, ChargeSource, ChargingTier, DecisionReason, SessionKind, SessionRecord,
    SessionTransition,
};
use tracing::{debug, info, warn};

use super::{ChargingDecisionEngine, ChargingInputs};
use crate::state::{ChargingSession, ChargingState};

impl ChargingDecisionEngine {
    /// Decide for this cycle without touching state.
    ///
    /// Calling it twice with the same inputs yields the same decision.
    pub fn evaluate(&self, state: &ChargingState, inputs: &ChargingInputs<'_>) -> ChargeDecision {
        let cfg = &self.config;
        let today = self.local_date(inputs.now);
        let soc = inputs.battery.soc();

        if let Some(session) = state.session_on(today) {
            return self.evaluate_active(session, inputs);
        }

        let tiered = self.evaluate_tiers(inputs);
        let grid_charge = tiered.should_charge && tiered.source == Some(ChargeSource::Grid);

        // Hardware is charging from the grid but no session is tracked. Charging while the
        // house exports or balances is PV self-consumption and is left alone.
        if inputs.battery.is_charging && inputs.power.is_grid_import() {
            if grid_charge {
                debug!("Battery already charging at {:.1}% without a tracked session", soc);
                return ChargeDecision {
                    reason: DecisionReason::SessionResync { soc },
                    transition: SessionTransition::Resync,
                    ..tiered
                };
            }
            if !tiered.should_charge {
                return tiered.with_transition(SessionTransition::Stop);
            }
        }

        if !grid_charge {
            return tiered;
        }

        if tiered.tier != Some(ChargingTier::Emergency) {
            let count = state.sessions_on(today);
            if count >= cfg.max_sessions_per_day {
                return ChargeDecision::idle(
                    DecisionReason::MaxSessions {
                        count,
                        max: cfg.max_sessions_per_day,
                    },
                    1.0,
                    inputs.price,
                )
                .with_tier(tiered.tier.unwrap_or(ChargingTier::Normal));
            }

            if let Some(last_end_soc) = state.last_session_end_soc
                && soc > last_end_soc - cfg.min_discharge_depth_percent
            {
                return ChargeDecision::idle(
                    DecisionReason::InsufficientDischargeDepth {
                        soc,
                        last_end_soc,
                        required_depth: cfg.min_discharge_depth_percent,
                    },
                    1.0,
                    inputs.price,
                )
                .with_tier(tiered.tier.unwrap_or(ChargingTier::Normal));
            }
        }

        tiered.with_transition(SessionTransition::Start)
    }

    /// Hysteresis for a running session: keep charging to the session's target unless a safety
    /// rule, the spike pause or (after the minimum duration) PV surplus or an expensive price
    /// ends it.
    fn evaluate_active(&self, session: &ChargingSession, inputs: &ChargingInputs<'_>) -> ChargeDecision {
        let cfg = &self.config;
        let soc = inputs.battery.soc();
        let price = inputs.price;
        let target = session.target_soc;
        let stop = |reason: DecisionReason| {
            ChargeDecision::idle(reason, 1.0, price).with_transition(SessionTransition::Stop)
        };

        if soc >= target {
            return stop(DecisionReason::TargetReached {
                soc,
                stop_soc: target,
            });
        }

        if !inputs.battery.is_charging {
            let last_seen = session.last_charging_seen.max(session.start_time);
            let idle_minutes = (inputs.now - last_seen).num_minutes();
            if idle_minutes > cfg.desync_grace_minutes {
                return ChargeDecision::idle(
                    DecisionReason::SessionDropped { idle_minutes },
                    0.8,
                    price,
                )
                .with_transition(SessionTransition::Drop);
            }
        }

        let continue_session = |reason: DecisionReason, confidence: f32| {
            let mut decision = self.charge(
                inputs,
                session.tier.unwrap_or(ChargingTier::Normal),
                session.source,
                target,
                reason,
                confidence,
            );
            decision.tier = session.tier;
            decision.with_transition(SessionTransition::Continue)
        };

        if soc < cfg.emergency_soc {
            return continue_session(
                DecisionReason::Emergency {
                    soc,
                    threshold: cfg.emergency_soc,
                },
                1.0,
            );
        }

        let start_price = session.start_price.max(0.01);
        let pause_price = start_price * (1.0 + cfg.spike_pause_percent / 100.0);
        if price >= pause_price {
            return stop(DecisionReason::SpikePause {
                price,
                start_price: session.start_price,
                increase_percent: (price / start_price - 1.0) * 100.0,
            });
        }

        if session.minutes_active(inputs.now) >= cfg.min_session_minutes {
            if inputs.power.is_pv_surplus(cfg.pv_overproduction_margin_w) {
                return stop(DecisionReason::PvOverproduction {
                    surplus_w: inputs.power.net_power_w(),
                });
            }
            if price > inputs.thresholds.high_price {
                return stop(DecisionReason::SessionPriceTooHigh {
                    price,
                    threshold: inputs.thresholds.high_price,
                });
            }
        }

        continue_session(
            DecisionReason::SessionContinue {
                soc,
                stop_soc: target,
            },
            0.9,
        )
    }

    /// Apply the decision's session transition.
    ///
    /// Returns a record when a session closed.
    pub fn commit(
        &self,
        state: &mut ChargingState,
        decision: &ChargeDecision,
        inputs: &ChargingInputs<'_>,
    ) -> Option<SessionRecord> {
        let now = inputs.now;
        let soc = inputs.battery.soc();
        state.roll_over(self.local_date(now));

        match decision.transition {
            SessionTransition::None => None,
            SessionTransition::Start => {
                if state.session.is_some() {
                    warn!("Session start requested while a session is active, ignoring");
                    return None;
                }
                if state.daily_session_count < self.config.max_sessions_per_day {
                    state.daily_session_count += 1;
                } else {
                    warn!(
                        "Emergency session beyond the daily limit, counter held at {}",
                        state.daily_session_count
                    );
                }
                state.session = Some(ChargingSession {
                    start_time: now,
                    start_soc: soc,
                    start_price: inputs.price,
                    source: decision.source.unwrap_or(ChargeSource::Grid),
                    target_soc: decision.target_soc.unwrap_or(self.config.stop_soc),
                    tier: decision.tier,
                    last_charging_seen: now,
                    adopted: false,
                });
                info!(
                    "🔋 Charging session {}/{} started at {:.1}%: {}",
                    state.daily_session_count,
                    self.config.max_sessions_per_day,
                    soc,
                    decision.reason
                );
                None
            }
            SessionTransition::Continue => {
                if let Some(session) = state.session.as_mut()
                    && inputs.battery.is_charging
                {
                    session.last_charging_seen = now;
                }
                None
            }
            SessionTransition::Resync => {
                if state.session.is_none() {
                    state.session = Some(ChargingSession {
                        start_time: now,
                        start_soc: soc,
                        start_price: inputs.price,
                        source: ChargeSource::Grid,
                        target_soc: decision.target_soc.unwrap_or(self.config.stop_soc),
                        tier: decision.tier,
                        last_charging_seen: now,
                        adopted: true,
                    });
                    warn!(
                        "Charging session state re-synchronized at {:.1}%, daily count stays {}",
                        soc, state.daily_session_count
                    );
                }
                None
            }
            SessionTransition::Drop => {
                if state.session.take().is_some() {
                    warn!(
                        "Tracked charging session dropped, battery no longer charging ({})",
                        decision.reason
                    );
                }
                None
            }
            SessionTransition::Stop => {
                let session = state.session.take()?;
                let end_soc = soc.max(session.start_soc);
                state.last_session_end_soc = Some(end_soc);
                info!(
                    "🔌 Charging session ended {:.1}% -> {:.1}% after {} min: {}",
                    session.start_soc,
                    end_soc,
                    session.minutes_active(now),
                    decision.reason
                );

                Some(SessionRecord {
                    kind: SessionKind::Charge,
                    session_id: None,
                    start_time: session.start_time,
                    end_time: now,
                    start_soc: session.start_soc,
                    end_soc,
                    energy_kwh: self.battery.energy_between(session.start_soc, end_soc),
                    start_price: session.start_price,
                    end_reason: decision.reason.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use gridsage_types::{
        AdaptiveThresholds, BatterySnapshot, PowerFlowSnapshot, PriceSample, PriceStatistics,
        PvOutlook, SystemConfig,
    };

    fn thresholds() -> AdaptiveThresholds {
        AdaptiveThresholds {
            high_price: 0.90,
            critical_price: 0.70,
            season: "winter".to_owned(),
            seasonal_multiplier: 1.3,
            used_fallback: false,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 3, 1, 0, 0).unwrap()
    }

    fn run(
        engine: &ChargingDecisionEngine,
        state: &mut ChargingState,
        now: DateTime<Utc>,
        battery: &BatterySnapshot,
        power: &PowerFlowSnapshot,
        price: f32,
    ) -> (ChargeDecision, Option<SessionRecord>) {
        let forecast = vec![PriceSample::new(now, price)];
        run_with_forecast(engine, state, now, battery, power, price, &forecast)
    }

    fn run_with_forecast(
        engine: &ChargingDecisionEngine,
        state: &mut ChargingState,
        now: DateTime<Utc>,
        battery: &BatterySnapshot,
        power: &PowerFlowSnapshot,
        price: f32,
        forecast: &[PriceSample],
    ) -> (ChargeDecision, Option<SessionRecord>) {
        let thresholds = thresholds();
        let stats = PriceStatistics::empty();
        let inputs = ChargingInputs {
            now,
            battery,
            power,
            price,
            thresholds: &thresholds,
            stats: &stats,
            forecast,
            tariff: None,
            pv_outlook: PvOutlook::default(),
        };
        let decision = engine.evaluate(state, &inputs);
        let record = engine.commit(state, &decision, &inputs);
        (decision, record)
    }

    #[test]
    fn test_session_start_counts_once() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();
        let power = PowerFlowSnapshot::default();

        let battery = BatterySnapshot::new(30.0, start());
        let (decision, _) = run(&engine, &mut state, start(), &battery, &power, 0.40);
        assert_eq!(decision.transition, SessionTransition::Start);
        assert_eq!(state.daily_session_count, 1);

        let now = start() + Duration::minutes(15);
        let battery = BatterySnapshot::new(40.0, now).charging(true);
        let (decision, _) = run(&engine, &mut state, now, &battery, &power, 0.40);
        assert_eq!(decision.transition, SessionTransition::Continue);
        assert_eq!(state.daily_session_count, 1);
    }

    #[test]
    fn test_stop_records_end_soc_not_below_start() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();
        let power = PowerFlowSnapshot::default();

        let battery = BatterySnapshot::new(30.0, start());
        run(&engine, &mut state, start(), &battery, &power, 0.40);

        // SOC reading dipped below the start SOC when the spike hit
        let now = start() + Duration::minutes(5);
        let battery = BatterySnapshot::new(29.5, now).charging(true);
        let (decision, record) = run(&engine, &mut state, now, &battery, &power, 2.0);
        assert_eq!(decision.reason.tag(), "spike_pause");

        let record = record.unwrap();
        assert!(record.end_soc >= record.start_soc);
        assert_eq!(state.last_session_end_soc, Some(30.0));
    }

    #[test]
    fn test_max_sessions_rejects_new_session() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState {
            daily_session_count: 3,
            day: Some(start().date_naive()),
            ..ChargingState::default()
        };
        let battery = BatterySnapshot::new(30.0, start());
        let (decision, _) = run(
            &engine,
            &mut state,
            start(),
            &battery,
            &PowerFlowSnapshot::default(),
            0.40,
        );
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "max_sessions");
        assert_eq!(state.daily_session_count, 3);
    }

    #[test]
    fn test_emergency_bypasses_limits_without_exceeding_count() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState {
            daily_session_count: 3,
            day: Some(start().date_naive()),
            last_session_end_soc: Some(8.0),
            ..ChargingState::default()
        };
        let battery = BatterySnapshot::new(3.0, start());
        let (decision, _) = run(
            &engine,
            &mut state,
            start(),
            &battery,
            &PowerFlowSnapshot::default(),
            2.0,
        );
        assert!(decision.should_charge);
        assert!(state.is_active());
        assert_eq!(state.daily_session_count, 3);
    }

    #[test]
    fn test_discharge_depth_required() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState {
            last_session_end_soc: Some(35.0),
            ..ChargingState::default()
        };
        let battery = BatterySnapshot::new(30.0, start());
        let (decision, _) = run(
            &engine,
            &mut state,
            start(),
            &battery,
            &PowerFlowSnapshot::default(),
            0.40,
        );
        assert_eq!(decision.reason.tag(), "insufficient_discharge_depth");

        let battery = BatterySnapshot::new(25.0, start());
        let (decision, _) = run(
            &engine,
            &mut state,
            start(),
            &battery,
            &PowerFlowSnapshot::default(),
            0.40,
        );
        assert_eq!(decision.transition, SessionTransition::Start);
    }

    #[test]
    fn test_session_dropped_when_hardware_stops() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();
        let power = PowerFlowSnapshot::default();

        let battery = BatterySnapshot::new(30.0, start());
        run(&engine, &mut state, start(), &battery, &power, 0.40);

        let now = start() + Duration::minutes(30);
        let battery = BatterySnapshot::new(31.0, now);
        let (decision, record) = run(&engine, &mut state, now, &battery, &power, 0.40);
        assert_eq!(decision.transition, SessionTransition::Drop);
        assert!(record.is_none());
        assert!(!state.is_active());
        assert_eq!(state.daily_session_count, 1);
    }

    #[test]
    fn test_expensive_price_stops_only_after_min_duration() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();
        let power = PowerFlowSnapshot::default();

        let battery = BatterySnapshot::new(30.0, start());
        run(&engine, &mut state, start(), &battery, &power, 0.80);

        let early = start() + Duration::minutes(10);
        let battery = BatterySnapshot::new(33.0, early).charging(true);
        let (decision, _) = run(&engine, &mut state, early, &battery, &power, 0.95);
        assert!(decision.should_charge);

        let later = start() + Duration::minutes(25);
        let battery = BatterySnapshot::new(36.0, later).charging(true);
        let (decision, record) = run(&engine, &mut state, later, &battery, &power, 0.95);
        assert!(!decision.should_charge);
        assert_eq!(decision.reason.tag(), "session_price_too_high");
        assert!(record.is_some());
    }

    #[test]
    fn test_day_rollover_clears_session() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();
        let power = PowerFlowSnapshot::default();

        let battery = BatterySnapshot::new(30.0, start());
        run(&engine, &mut state, start(), &battery, &power, 0.40);
        assert!(state.is_active());

        let next_day = start() + Duration::days(1);
        let battery = BatterySnapshot::new(96.0, next_day);
        let (decision, _) = run(&engine, &mut state, next_day, &battery, &power, 0.90);
        assert_eq!(decision.transition, SessionTransition::None);
        assert!(!state.is_active());
        assert_eq!(state.daily_session_count, 0);
    }

    fn solar_charging() -> PowerFlowSnapshot {
        PowerFlowSnapshot {
            pv_power_w: 1200.0,
            house_load_w: 900.0,
            ..PowerFlowSnapshot::default()
        }
    }

    /// Day mostly priced well below `0.80`
    fn cheaper_day(from: DateTime<Utc>) -> Vec<PriceSample> {
        (0..24)
            .map(|h| PriceSample::new(from + Duration::hours(h), 0.40))
            .collect()
    }

    #[test]
    fn test_solar_self_charging_is_left_alone() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();
        let noon = Utc.with_ymd_and_hms(2025, 11, 3, 11, 0, 0).unwrap();
        let forecast = cheaper_day(noon);

        for cycle in 0..3 {
            let now = noon + Duration::minutes(15 * cycle);
            let battery = BatterySnapshot::new(60.0, now).charging(true);
            let (decision, record) = run_with_forecast(
                &engine,
                &mut state,
                now,
                &battery,
                &solar_charging(),
                0.80,
                &forecast,
            );
            assert!(!decision.should_charge);
            assert_eq!(decision.transition, SessionTransition::None);
            assert!(record.is_none());
        }
        assert!(!state.is_active());
    }

    #[test]
    fn test_untracked_grid_charging_is_stopped() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let state = ChargingState::default();
        let noon = Utc.with_ymd_and_hms(2025, 11, 3, 11, 0, 0).unwrap();
        let battery = BatterySnapshot::new(60.0, noon).charging(true);
        let power = PowerFlowSnapshot {
            grid_power_w: 3000.0,
            ..PowerFlowSnapshot::default()
        };
        let thresholds = thresholds();
        let stats = PriceStatistics::empty();
        let forecast = cheaper_day(noon);
        let inputs = ChargingInputs {
            now: noon,
            battery: &battery,
            power: &power,
            price: 0.80,
            thresholds: &thresholds,
            stats: &stats,
            forecast: &forecast,
            tariff: None,
            pv_outlook: PvOutlook::default(),
        };
        let decision = engine.evaluate(&state, &inputs);
        assert!(!decision.should_charge);
        assert_eq!(decision.transition, SessionTransition::Stop);
    }

    #[test]
    fn test_pv_trickle_does_not_adopt_grid_session() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();

        let battery = BatterySnapshot::new(30.0, start()).charging(true);
        let (decision, _) = run(&engine, &mut state, start(), &battery, &solar_charging(), 0.45);
        assert!(decision.should_charge);
        assert_eq!(decision.transition, SessionTransition::Start);
        assert_eq!(state.daily_session_count, 1);
        assert!(!state.session.as_ref().unwrap().adopted);
    }

    #[test]
    fn test_super_low_session_charges_to_its_own_target() {
        let engine = ChargingDecisionEngine::new(&SystemConfig::default());
        let mut state = ChargingState::default();
        let power = PowerFlowSnapshot::default();

        let battery = BatterySnapshot::new(70.0, start());
        let (decision, _) = run(&engine, &mut state, start(), &battery, &power, 0.10);
        assert_eq!(decision.transition, SessionTransition::Start);
        assert_eq!(decision.target_soc, Some(100.0));

        let now = start() + Duration::minutes(40);
        let battery = BatterySnapshot::new(96.0, now).charging(true);
        let (decision, record) = run(&engine, &mut state, now, &battery, &power, 0.10);
        assert!(decision.should_charge);
        assert_eq!(decision.target_soc, Some(100.0));
        assert!(record.is_none());

        let now = start() + Duration::minutes(50);
        let battery = BatterySnapshot::new(100.0, now).charging(true);
        let (decision, record) = run(&engine, &mut state, now, &battery, &power, 0.10);
        assert_eq!(decision.reason.tag(), "target_reached");
        assert!(record.is_some());
    }
}
