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

//! Explicit engine state threaded through every decision call.
//!
//! Constructed once at process start and owned by the decision loop. Evaluation reads it;
//! only the commit step of each engine mutates it.

use chrono::{DateTime, NaiveDate, Utc};
use gridsage_types::{ChargeSource, ChargingTier, DailySellingPlan};
use std::collections::HashSet;
use tracing::info;

use crate::spike::PriceSpikeDetector;

/// A running grid charging session
#[derive(Debug, Clone, PartialEq)]
pub struct ChargingSession {
    pub start_time: DateTime<Utc>,
    pub start_soc: f32,

    /// Price when the session started, reference for the spike pause
    pub start_price: f32,

    pub source: ChargeSource,

    /// SOC the session charges to
    pub target_soc: f32,

    /// Tier that started it (None when adopted from the hardware)
    pub tier: Option<ChargingTier>,

    /// Last cycle the battery reported charging
    pub last_charging_seen: DateTime<Utc>,

    /// Adopted from live hardware state rather than started by the engine
    pub adopted: bool,
}

impl ChargingSession {
    pub fn minutes_active(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_minutes()
    }
}

/// Charging side of the engine state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChargingState {
    pub session: Option<ChargingSession>,

    /// Sessions started on `day`
    pub daily_session_count: u32,

    /// Local date the counter belongs to
    pub day: Option<NaiveDate>,

    /// SOC at which the previous session ended
    pub last_session_end_soc: Option<f32>,
}

impl ChargingState {
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Session still valid on `today` (sessions do not survive local midnight)
    pub fn session_on(&self, today: NaiveDate) -> Option<&ChargingSession> {
        if self.day == Some(today) {
            self.session.as_ref()
        } else {
            None
        }
    }

    /// Sessions started on `today`
    pub fn sessions_on(&self, today: NaiveDate) -> u32 {
        if self.day == Some(today) {
            self.daily_session_count
        } else {
            0
        }
    }

    /// Clear the session and counter when the local date changed
    pub fn roll_over(&mut self, today: NaiveDate) {
        if self.day == Some(today) {
            return;
        }
        if self.day.is_some() {
            info!(
                "New day {}, resetting charging sessions ({} yesterday{})",
                today,
                self.daily_session_count,
                if self.session.is_some() { ", active session cleared" } else { "" }
            );
        }
        self.day = Some(today);
        self.daily_session_count = 0;
        self.session = None;
    }
}

/// A running discharge
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSell {
    /// Plan session id, None for spike-triggered sells
    pub session_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub start_soc: f32,
    pub start_price: f32,

    /// Discharge ends at this SOC
    pub target_soc: f32,

    /// Planned window end, None for spike-triggered sells
    pub window_end: Option<DateTime<Utc>>,
}

/// What the current plan was built from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanBasis {
    pub date: NaiveDate,
    pub forecast_max_price: f32,
}

/// Selling side of the engine state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SellingState {
    pub active: Option<ActiveSell>,

    /// Sell sessions started on `day`
    pub daily_cycles: u32,

    pub day: Option<NaiveDate>,

    pub plan: Option<DailySellingPlan>,

    /// Set whenever a plan generation was attempted, even if it produced no plan
    pub plan_basis: Option<PlanBasis>,

    /// Plan sessions already started (each runs at most once)
    pub completed_sessions: HashSet<String>,
}

impl SellingState {
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn cycles_on(&self, today: NaiveDate) -> u32 {
        if self.day == Some(today) {
            self.daily_cycles
        } else {
            0
        }
    }

    pub fn active_on(&self, today: NaiveDate) -> Option<&ActiveSell> {
        if self.day == Some(today) {
            self.active.as_ref()
        } else {
            None
        }
    }

    pub fn roll_over(&mut self, today: NaiveDate) {
        if self.day == Some(today) {
            return;
        }
        if self.day.is_some() {
            info!(
                "New day {}, resetting sell cycles ({} yesterday)",
                today, self.daily_cycles
            );
        }
        self.day = Some(today);
        self.daily_cycles = 0;
        self.active = None;
        self.completed_sessions.clear();
    }
}

/// Everything the engine remembers between cycles
#[derive(Debug)]
pub struct EngineState {
    pub charging: ChargingState,
    pub selling: SellingState,
    pub spike_detector: PriceSpikeDetector,
}

impl EngineState {
    pub fn new(spike_detector: PriceSpikeDetector) -> Self {
        Self {
            charging: ChargingState::default(),
            selling: SellingState::default(),
            spike_detector,
        }
    }

    /// Apply local-midnight resets to every component
    pub fn roll_over(&mut self, now: DateTime<Utc>, today: NaiveDate) {
        self.charging.roll_over(today);
        self.selling.roll_over(today);
        self.spike_detector.reset_daily_if_needed(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, day).unwrap()
    }

    #[test]
    fn test_charging_roll_over_clears_session() {
        let now = Utc::now();
        let mut state = ChargingState {
            session: Some(ChargingSession {
                start_time: now,
                start_soc: 30.0,
                start_price: 0.4,
                source: ChargeSource::Grid,
                target_soc: 95.0,
                tier: Some(ChargingTier::Opportunistic),
                last_charging_seen: now,
                adopted: false,
            }),
            daily_session_count: 2,
            day: Some(date(3)),
            last_session_end_soc: Some(60.0),
        };

        assert_eq!(state.sessions_on(date(3)), 2);
        assert_eq!(state.sessions_on(date(4)), 0);
        assert!(state.session_on(date(4)).is_none());

        state.roll_over(date(3));
        assert!(state.is_active());

        state.roll_over(date(4));
        assert!(!state.is_active());
        assert_eq!(state.daily_session_count, 0);
        assert_eq!(state.last_session_end_soc, Some(60.0));
    }

    #[test]
    fn test_selling_roll_over_resets_cycles() {
        let mut state = SellingState {
            daily_cycles: 2,
            day: Some(date(3)),
            ..SellingState::default()
        };
        state.completed_sessions.insert("2025-11-03-1".to_owned());

        state.roll_over(date(4));
        assert_eq!(state.daily_cycles, 0);
        assert!(state.completed_sessions.is_empty());
    }
}
