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

//! Plain data model and configuration shared by the GridSage crates.

pub mod config;
pub mod decision;
pub mod pricing;
pub mod scheduling;
pub mod spike;
pub mod telemetry;

// Re-export common types for convenience
pub use config::{SeasonConfig, SystemConfig, ThresholdMethod};
pub use decision::{
    ActionKind, ChargeDecision, ChargeSource, ChargingTier, Decision, DecisionReason,
    DecisionRecord, SellDecision, SessionKind, SessionRecord, SessionTransition,
};
pub use pricing::{
    AdaptiveThresholds, Currency, PriceSample, PriceStatistics, PriceUpdate,
    TariffWindow, TariffZone,
};
pub use scheduling::{DailySellingPlan, PeakQuality, SellingSession};
pub use spike::{Spike, SpikeAction, SpikeLevel};
pub use telemetry::{
    BatterySnapshot, CommandKind, InverterCommand, PowerFlowSnapshot, PvOutlook,
};
