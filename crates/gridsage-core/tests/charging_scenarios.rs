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

//! Charging session scenarios across consecutive decision cycles

use chrono::{DateTime, Duration, TimeZone, Utc};
use gridsage_core::{ChargingDecisionEngine, ChargingInputs, ChargingState};
use gridsage_types::{
    AdaptiveThresholds, BatterySnapshot, ChargeDecision, PowerFlowSnapshot, PriceSample,
    PriceStatistics, PvOutlook, SessionRecord, SessionTransition, SystemConfig,
};

struct Scenario {
    engine: ChargingDecisionEngine,
    state: ChargingState,
    thresholds: AdaptiveThresholds,
    stats: PriceStatistics,
    power: PowerFlowSnapshot,
    start: DateTime<Utc>,
}

impl Scenario {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Self {
            engine: ChargingDecisionEngine::new(&SystemConfig::default()),
            state: ChargingState::default(),
            thresholds: AdaptiveThresholds {
                high_price: 0.90,
                critical_price: 0.70,
                season: "winter".to_owned(),
                seasonal_multiplier: 1.3,
                used_fallback: false,
            },
            stats: PriceStatistics::empty(),
            power: PowerFlowSnapshot::default(),
            // 02:00 local in Warsaw, off-peak
            start: Utc.with_ymd_and_hms(2025, 11, 3, 1, 0, 0).unwrap(),
        }
    }

    fn at(&self, minutes: i64) -> DateTime<Utc> {
        self.start + Duration::minutes(minutes)
    }

    fn forecast(&self, price: f32) -> Vec<PriceSample> {
        (0..24)
            .map(|h| PriceSample::new(self.start + Duration::hours(h), price))
            .collect()
    }

    fn evaluate(&self, minutes: i64, soc: f32, charging: bool, price: f32) -> ChargeDecision {
        let now = self.at(minutes);
        let battery = BatterySnapshot::new(soc, now).charging(charging);
        let forecast = self.forecast(0.30);
        let inputs = ChargingInputs {
            now,
            battery: &battery,
            power: &self.power,
            price,
            thresholds: &self.thresholds,
            stats: &self.stats,
            forecast: &forecast,
            tariff: None,
            pv_outlook: PvOutlook::default(),
        };
        self.engine.evaluate(&self.state, &inputs)
    }

    /// Evaluate and commit one cycle
    fn cycle(
        &mut self,
        minutes: i64,
        soc: f32,
        charging: bool,
        price: f32,
    ) -> (ChargeDecision, Option<SessionRecord>) {
        let now = self.at(minutes);
        let battery = BatterySnapshot::new(soc, now).charging(charging);
        let forecast = self.forecast(0.30);
        let inputs = ChargingInputs {
            now,
            battery: &battery,
            power: &self.power,
            price,
            thresholds: &self.thresholds,
            stats: &self.stats,
            forecast: &forecast,
            tariff: None,
            pv_outlook: PvOutlook::default(),
        };
        let decision = self.engine.evaluate(&self.state, &inputs);
        let record = self.engine.commit(&mut self.state, &decision, &inputs);
        (decision, record)
    }
}

#[test]
fn test_hysteresis_keeps_charging_until_stop_soc() {
    let mut scenario = Scenario::new();

    let (decision, _) = scenario.cycle(0, 85.0, false, 0.30);
    assert!(decision.should_charge);
    assert_eq!(decision.transition, SessionTransition::Start);

    for (i, soc) in (86..=94).enumerate() {
        let (decision, record) = scenario.cycle(5 * (i as i64 + 1), soc as f32, true, 0.30);
        assert!(decision.should_charge, "stopped early at {soc}%");
        assert_eq!(decision.transition, SessionTransition::Continue);
        assert!(record.is_none());
    }

    let (decision, record) = scenario.cycle(60, 95.0, true, 0.30);
    assert!(!decision.should_charge);
    assert_eq!(decision.reason.tag(), "target_reached");
    let record = record.expect("session record on stop");
    assert_eq!(record.start_soc, 85.0);
    assert_eq!(record.end_soc, 95.0);
    assert!((record.energy_kwh - 1.0).abs() < 1e-4);
}

#[test]
fn test_continue_past_normal_threshold() {
    let mut scenario = Scenario::new();
    scenario.cycle(0, 85.0, false, 0.30);

    let decision = scenario.evaluate(10, 93.0, true, 0.30);
    assert!(decision.should_charge);
    assert!(decision.reason.to_string().contains("continue to 95%"));

    let decision = scenario.evaluate(10, 95.0, true, 0.30);
    assert!(!decision.should_charge);
}

#[test]
fn test_price_spike_pauses_active_session() {
    let mut scenario = Scenario::new();
    scenario.cycle(0, 85.0, false, 0.30);

    let (decision, record) = scenario.cycle(5, 87.0, true, 2.00);
    assert!(!decision.should_charge);
    assert!(decision.reason.is_spike());
    assert!(decision.reason.to_string().contains("spike"));
    assert!(record.is_some());
    assert!(!scenario.state.is_active());
}

#[test]
fn test_resync_does_not_double_count() {
    let mut scenario = Scenario::new();
    scenario.state.daily_session_count = 2;
    scenario.state.day = Some(scenario.start.date_naive());
    scenario.power.grid_power_w = 3000.0;

    // Hardware charging from the grid with no tracked session
    let (decision, _) = scenario.cycle(0, 30.0, true, 0.30);
    assert_eq!(decision.transition, SessionTransition::Resync);
    assert!(scenario.state.is_active());
    assert_eq!(scenario.state.daily_session_count, 2);

    // Re-evaluating the adopted session keeps the count
    let (decision, _) = scenario.cycle(5, 31.0, true, 0.30);
    assert_eq!(decision.transition, SessionTransition::Continue);
    assert_eq!(scenario.state.daily_session_count, 2);
}

#[test]
fn test_evaluation_is_idempotent() {
    let mut scenario = Scenario::new();
    scenario.cycle(0, 40.0, false, 0.30);
    let before = scenario.state.clone();

    let first = scenario.evaluate(5, 45.0, true, 0.30);
    let second = scenario.evaluate(5, 45.0, true, 0.30);
    assert_eq!(first, second);
    assert_eq!(scenario.state, before);
}

#[test]
fn test_sessions_limited_per_day() {
    let mut scenario = Scenario::new();
    let mut soc = 20.0;
    let mut minutes = 0;

    for _ in 0..3 {
        let (decision, _) = scenario.cycle(minutes, soc, false, 0.30);
        assert_eq!(decision.transition, SessionTransition::Start);
        minutes += 30;
        scenario.cycle(minutes, 95.0, true, 0.30);
        // Discharge well below the previous session's end
        soc = 40.0;
        minutes += 30;
    }

    let (decision, _) = scenario.cycle(minutes, soc, false, 0.30);
    assert!(!decision.should_charge);
    assert_eq!(decision.reason.tag(), "max_sessions");
}
