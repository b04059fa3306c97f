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

use crate::spike::SpikeLevel;
use crate::telemetry::InverterCommand;

// ============= Action Kinds =============

/// What the battery should be doing after this cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    ChargeGrid,
    ChargePv,
    Sell,
    #[default]
    Idle,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChargeGrid => write!(f, "charge-grid"),
            Self::ChargePv => write!(f, "charge-pv"),
            Self::Sell => write!(f, "sell"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Where charging energy comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeSource {
    Grid,
    Pv,
}

/// SOC tier that produced a charging decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingTier {
    Emergency,
    SuperLow,
    Critical,
    Opportunistic,
    Normal,
}

impl fmt::Display for ChargingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emergency => write!(f, "emergency"),
            Self::SuperLow => write!(f, "super-low price"),
            Self::Critical => write!(f, "critical"),
            Self::Opportunistic => write!(f, "opportunistic"),
            Self::Normal => write!(f, "normal"),
        }
    }
}

/// Session bookkeeping a decision asks the caller to commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTransition {
    /// Nothing changes
    #[default]
    None,
    /// Open a new session (counts toward the daily limit)
    Start,
    /// Keep the running session
    Continue,
    /// Close the running session
    Stop,
    /// Adopt a session the hardware is already running (no count change)
    Resync,
    /// Forget a tracked session the hardware is no longer running (no count change)
    Drop,
}

// ============= Decision Reasons =============

/// Structured reason behind every decision
///
/// Rendered to text only at the logging and record boundary. [`DecisionReason::tag`] gives a
/// stable machine-readable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    // Charging tiers
    Emergency {
        soc: f32,
        threshold: f32,
    },
    SuperLowPrice {
        price: f32,
        threshold: f32,
    },
    SuperLowPvPreferred {
        price: f32,
        pv_hours: f32,
    },
    CriticalAcceptablePrice {
        price: f32,
        threshold: f32,
    },
    CriticalBoundaryHold {
        soc: f32,
        price: f32,
        limit: f32,
    },
    CriticalWaiting {
        hours_until_cheapest: f32,
        max_wait_hours: f32,
        savings_percent: f32,
    },
    CriticalChargeAnyway {
        hours_until_cheapest: f32,
        max_wait_hours: f32,
        savings_percent: f32,
    },
    WithinTolerance {
        price: f32,
        cheapest: f32,
        tolerance_percent: f32,
    },
    AboveTolerance {
        price: f32,
        cheapest: f32,
        tolerance_percent: f32,
    },
    TariffDeadline {
        remaining_minutes: i64,
        needed_minutes: i64,
    },
    CheapWindow {
        price: f32,
        threshold: f32,
    },
    ProactiveCharge {
        pv_power_w: f32,
        price: f32,
    },
    BatterySufficient {
        soc: f32,
    },

    // Overrides and session control
    PvOverproduction {
        surplus_w: f32,
    },
    TargetReached {
        soc: f32,
        stop_soc: f32,
    },
    SessionContinue {
        soc: f32,
        stop_soc: f32,
    },
    SpikePause {
        price: f32,
        start_price: f32,
        increase_percent: f32,
    },
    SessionPriceTooHigh {
        price: f32,
        threshold: f32,
    },
    MaxSessions {
        count: u32,
        max: u32,
    },
    InsufficientDischargeDepth {
        soc: f32,
        last_end_soc: f32,
        required_depth: f32,
    },
    SessionResync {
        soc: f32,
    },
    SessionDropped {
        idle_minutes: i64,
    },
    InsufficientData {
        missing: String,
    },

    // Selling
    ScheduledSell {
        session_id: String,
        price: f32,
    },
    SpikeSell {
        level: SpikeLevel,
        price: f32,
        increase_percent: f32,
    },
    SellContinue {
        soc: f32,
        floor: f32,
    },
    BelowMinSellPrice {
        price: f32,
        min_price: f32,
    },
    SocBelowSellMinimum {
        soc: f32,
        min_soc: f32,
    },
    SafetyMarginReached {
        soc: f32,
        floor: f32,
    },
    SafetyBlocked {
        failures: Vec<String>,
    },
    MaxCycles {
        cycles: u32,
        max: u32,
    },
    SellWindowEnded {
        session_id: Option<String>,
    },
    NoSellOpportunity,
    ChargingPriority,
    SellingPriority,
}

impl DecisionReason {
    /// Stable tag for records and metrics
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Emergency { .. } => "emergency",
            Self::SuperLowPrice { .. } => "super_low_price",
            Self::SuperLowPvPreferred { .. } => "super_low_pv_preferred",
            Self::CriticalAcceptablePrice { .. } => "critical_acceptable_price",
            Self::CriticalBoundaryHold { .. } => "critical_boundary_hold",
            Self::CriticalWaiting { .. } => "critical_waiting",
            Self::CriticalChargeAnyway { .. } => "critical_charge_anyway",
            Self::WithinTolerance { .. } => "within_tolerance",
            Self::AboveTolerance { .. } => "above_tolerance",
            Self::TariffDeadline { .. } => "tariff_deadline",
            Self::CheapWindow { .. } => "cheap_window",
            Self::ProactiveCharge { .. } => "proactive_charge",
            Self::BatterySufficient { .. } => "battery_sufficient",
            Self::PvOverproduction { .. } => "pv_overproduction",
            Self::TargetReached { .. } => "target_reached",
            Self::SessionContinue { .. } => "session_continue",
            Self::SpikePause { .. } => "spike_pause",
            Self::SessionPriceTooHigh { .. } => "session_price_too_high",
            Self::MaxSessions { .. } => "max_sessions",
            Self::InsufficientDischargeDepth { .. } => "insufficient_discharge_depth",
            Self::SessionResync { .. } => "session_resync",
            Self::SessionDropped { .. } => "session_dropped",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::ScheduledSell { .. } => "scheduled_sell",
            Self::SpikeSell { .. } => "spike_sell",
            Self::SellContinue { .. } => "sell_continue",
            Self::BelowMinSellPrice { .. } => "below_min_sell_price",
            Self::SocBelowSellMinimum { .. } => "soc_below_sell_minimum",
            Self::SafetyMarginReached { .. } => "safety_margin_reached",
            Self::SafetyBlocked { .. } => "safety_blocked",
            Self::MaxCycles { .. } => "max_cycles",
            Self::SellWindowEnded { .. } => "sell_window_ended",
            Self::NoSellOpportunity => "no_sell_opportunity",
            Self::ChargingPriority => "charging_priority",
            Self::SellingPriority => "selling_priority",
        }
    }

    pub fn is_spike(&self) -> bool {
        matches!(self, Self::SpikePause { .. } | Self::SpikeSell { .. })
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emergency { soc, threshold } => {
                write!(f, "emergency: SOC {soc:.1}% below {threshold:.1}%")
            }
            Self::SuperLowPrice { price, threshold } => {
                write!(f, "super-low price {price:.3} <= {threshold:.3}, filling from grid")
            }
            Self::SuperLowPvPreferred { price, pv_hours } => write!(
                f,
                "super-low price {price:.3} but solar reaches target in {pv_hours:.1} h, using PV"
            ),
            Self::CriticalAcceptablePrice { price, threshold } => write!(
                f,
                "critical SOC, acceptable price {price:.3} <= {threshold:.3}"
            ),
            Self::CriticalBoundaryHold { soc, price, limit } => write!(
                f,
                "critical SOC at {soc:.0}% boundary, price {price:.3} above {limit:.3}, waiting"
            ),
            Self::CriticalWaiting {
                hours_until_cheapest,
                max_wait_hours,
                savings_percent,
            } => write!(
                f,
                "critical SOC, waiting {hours_until_cheapest:.1} h (max {max_wait_hours:.1} h) to save {savings_percent:.0}%"
            ),
            Self::CriticalChargeAnyway {
                hours_until_cheapest,
                max_wait_hours,
                savings_percent,
            } => write!(
                f,
                "critical SOC, cheaper price in {hours_until_cheapest:.1} h (max wait {max_wait_hours:.1} h, saving {savings_percent:.0}%), charging now"
            ),
            Self::WithinTolerance {
                price,
                cheapest,
                tolerance_percent,
            } => write!(
                f,
                "price {price:.3} within {tolerance_percent:.0}% of cheapest {cheapest:.3}"
            ),
            Self::AboveTolerance {
                price,
                cheapest,
                tolerance_percent,
            } => write!(
                f,
                "price {price:.3} more than {tolerance_percent:.0}% above cheapest {cheapest:.3}, waiting"
            ),
            Self::TariffDeadline {
                remaining_minutes,
                needed_minutes,
            } => write!(
                f,
                "tariff window ends in {remaining_minutes} min, {needed_minutes} min needed to reach target, charging now"
            ),
            Self::CheapWindow { price, threshold } => {
                write!(f, "cheap window: price {price:.3} <= {threshold:.3}")
            }
            Self::ProactiveCharge { pv_power_w, price } => write!(
                f,
                "proactive charge: PV {pv_power_w:.0} W with no improvement expected, price {price:.3}"
            ),
            Self::BatterySufficient { soc } => write!(f, "battery sufficient at {soc:.1}%"),
            Self::PvOverproduction { surplus_w } => {
                write!(f, "PV surplus {surplus_w:.0} W, no grid charging")
            }
            Self::TargetReached { soc, stop_soc } => {
                write!(f, "target reached: SOC {soc:.1}% >= {stop_soc:.1}%")
            }
            Self::SessionContinue { soc, stop_soc } => {
                write!(f, "session active, continue to {stop_soc:.0}% (SOC {soc:.1}%)")
            }
            Self::SpikePause {
                price,
                start_price,
                increase_percent,
            } => write!(
                f,
                "price spiked {increase_percent:.0}% above session start ({start_price:.3} -> {price:.3}), pausing"
            ),
            Self::SessionPriceTooHigh { price, threshold } => write!(
                f,
                "price {price:.3} above high threshold {threshold:.3}, stopping session"
            ),
            Self::MaxSessions { count, max } => {
                write!(f, "max sessions reached ({count}/{max} today)")
            }
            Self::InsufficientDischargeDepth {
                soc,
                last_end_soc,
                required_depth,
            } => write!(
                f,
                "insufficient discharge depth: SOC {soc:.1}% vs last session end {last_end_soc:.1}% (need {required_depth:.0}%)"
            ),
            Self::SessionResync { soc } => {
                write!(f, "battery already charging at {soc:.1}%, session state re-synchronized")
            }
            Self::SessionDropped { idle_minutes } => write!(
                f,
                "tracked session not charging for {idle_minutes} min, session state re-synchronized"
            ),
            Self::InsufficientData { missing } => write!(f, "insufficient data: {missing}"),
            Self::ScheduledSell { session_id, price } => {
                write!(f, "scheduled sell session {session_id} at {price:.3}")
            }
            Self::SpikeSell {
                level,
                price,
                increase_percent,
            } => write!(
                f,
                "{level} price spike {price:.3} (+{increase_percent:.0}%), selling"
            ),
            Self::SellContinue { soc, floor } => {
                write!(f, "selling, SOC {soc:.1}% above floor {floor:.1}%")
            }
            Self::BelowMinSellPrice { price, min_price } => {
                write!(f, "price {price:.3} below minimum sell price {min_price:.3}")
            }
            Self::SocBelowSellMinimum { soc, min_soc } => {
                write!(f, "SOC {soc:.1}% below selling minimum {min_soc:.1}%")
            }
            Self::SafetyMarginReached { soc, floor } => {
                write!(f, "safety margin reached: SOC {soc:.1}% <= {floor:.1}%")
            }
            Self::SafetyBlocked { failures } => {
                write!(f, "selling blocked by safety checks: {}", failures.join("; "))
            }
            Self::MaxCycles { cycles, max } => {
                write!(f, "max daily sell cycles reached ({cycles}/{max})")
            }
            Self::SellWindowEnded { session_id } => match session_id {
                Some(id) => write!(f, "sell session {id} window ended"),
                None => write!(f, "price spike over, sell ended"),
            },
            Self::NoSellOpportunity => write!(f, "no sell opportunity"),
            Self::ChargingPriority => write!(f, "charging takes priority"),
            Self::SellingPriority => write!(f, "selling takes priority"),
        }
    }
}

// ============= Decisions =============

/// Output of the charging engine for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeDecision {
    pub should_charge: bool,
    pub reason: DecisionReason,

    /// 0.0-1.0
    pub confidence: f32,

    /// Tier that produced the decision (None for overrides outside the tiers)
    pub tier: Option<ChargingTier>,

    pub source: Option<ChargeSource>,
    pub target_soc: Option<f32>,

    /// Energy to reach target (kWh)
    pub estimated_energy_kwh: f32,

    /// Energy × current price
    pub estimated_cost: f32,

    pub transition: SessionTransition,

    /// Price the decision was made at
    pub price: f32,
}

impl ChargeDecision {
    /// A "do not charge" decision
    pub fn idle(reason: DecisionReason, confidence: f32, price: f32) -> Self {
        Self {
            should_charge: false,
            reason,
            confidence,
            tier: None,
            source: None,
            target_soc: None,
            estimated_energy_kwh: 0.0,
            estimated_cost: 0.0,
            transition: SessionTransition::None,
            price,
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: ChargingTier) -> Self {
        self.tier = Some(tier);
        self
    }

    #[must_use]
    pub fn with_transition(mut self, transition: SessionTransition) -> Self {
        self.transition = transition;
        self
    }

    pub fn action(&self) -> ActionKind {
        match (self.should_charge, self.source) {
            (true, Some(ChargeSource::Pv)) => ActionKind::ChargePv,
            (true, _) => ActionKind::ChargeGrid,
            (false, _) => ActionKind::Idle,
        }
    }
}

/// Output of the selling engine for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellDecision {
    pub should_sell: bool,
    pub reason: DecisionReason,

    /// 0.0-1.0
    pub confidence: f32,

    /// Plan session being executed, if any
    pub session_id: Option<String>,

    /// SOC at which discharge ends
    pub target_soc: Option<f32>,

    /// Requested export power (W)
    pub power_w: f32,

    pub estimated_energy_kwh: f32,
    pub expected_revenue: f32,

    pub transition: SessionTransition,

    pub price: f32,
}

impl SellDecision {
    pub fn hold(reason: DecisionReason, price: f32) -> Self {
        Self {
            should_sell: false,
            reason,
            confidence: 1.0,
            session_id: None,
            target_soc: None,
            power_w: 0.0,
            estimated_energy_kwh: 0.0,
            expected_revenue: 0.0,
            transition: SessionTransition::None,
            price,
        }
    }

    #[must_use]
    pub fn with_transition(mut self, transition: SessionTransition) -> Self {
        self.transition = transition;
        self
    }
}

/// Arbitrated result of one decision cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: DateTime<Utc>,
    pub should_act: bool,
    pub action: ActionKind,
    pub reason: DecisionReason,
    pub confidence: f32,
    pub charge: ChargeDecision,
    pub sell: SellDecision,

    /// Commands to send, in order
    pub commands: Vec<InverterCommand>,
}

impl Decision {
    /// Target SOC of the winning action
    pub fn target_soc(&self) -> Option<f32> {
        match self.action {
            ActionKind::ChargeGrid | ActionKind::ChargePv => self.charge.target_soc,
            ActionKind::Sell => self.sell.target_soc,
            ActionKind::Idle => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.sell.session_id.as_deref()
    }
}

// ============= Records =============

/// Per-cycle record handed to the storage collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub reason: String,
    pub tag: String,
    pub soc: f32,

    #[serde(rename = "final_price_pln", alias = "price")]
    pub price: f32,

    pub energy_kwh: f32,
    pub cost: f32,
    pub revenue: f32,
    pub confidence: f32,
}

impl DecisionRecord {
    pub fn from_decision(decision: &Decision, soc: f32) -> Self {
        let (energy_kwh, cost, revenue, price) = match decision.action {
            ActionKind::ChargeGrid | ActionKind::ChargePv => (
                decision.charge.estimated_energy_kwh,
                decision.charge.estimated_cost,
                0.0,
                decision.charge.price,
            ),
            ActionKind::Sell => (
                decision.sell.estimated_energy_kwh,
                0.0,
                decision.sell.expected_revenue,
                decision.sell.price,
            ),
            ActionKind::Idle => (0.0, 0.0, 0.0, decision.charge.price),
        };

        Self {
            timestamp: decision.timestamp,
            action: decision.action,
            reason: decision.reason.to_string(),
            tag: decision.reason.tag().to_owned(),
            soc,
            price,
            energy_kwh,
            cost,
            revenue,
            confidence: decision.confidence,
        }
    }
}

/// Kind of a closed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Charge,
    Sell,
}

/// Summary of a closed charge or sell session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub kind: SessionKind,

    /// Plan session id for sell sessions
    pub session_id: Option<String>,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_soc: f32,

    /// For charge sessions never below `start_soc`
    pub end_soc: f32,

    pub energy_kwh: f32,
    pub start_price: f32,
    pub end_reason: String,
}

impl SessionRecord {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_pause_text_mentions_spike() {
        let reason = DecisionReason::SpikePause {
            price: 2.0,
            start_price: 0.5,
            increase_percent: 300.0,
        };
        let text = reason.to_string();
        assert!(text.contains("spike"));
        assert!(text.contains("pausing"));
        assert_eq!(reason.tag(), "spike_pause");
        assert!(reason.is_spike());
    }

    #[test]
    fn test_charge_action_kind() {
        let mut decision = ChargeDecision::idle(DecisionReason::BatterySufficient { soc: 80.0 }, 1.0, 0.5);
        assert_eq!(decision.action(), ActionKind::Idle);

        decision.should_charge = true;
        decision.source = Some(ChargeSource::Pv);
        assert_eq!(decision.action(), ActionKind::ChargePv);

        decision.source = Some(ChargeSource::Grid);
        assert_eq!(decision.action(), ActionKind::ChargeGrid);
    }

    #[test]
    fn test_record_serializes_price_under_legacy_name() {
        let record = DecisionRecord {
            timestamp: Utc::now(),
            action: ActionKind::Idle,
            reason: "no sell opportunity".to_owned(),
            tag: "no_sell_opportunity".to_owned(),
            soc: 60.0,
            price: 0.42,
            energy_kwh: 0.0,
            cost: 0.0,
            revenue: 0.0,
            confidence: 1.0,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["final_price_pln"].as_f64().map(|v| v as f32), Some(0.42));
        assert_eq!(json["action"], "idle");
    }
}
