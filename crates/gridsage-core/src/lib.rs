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

//! GridSage decision engine.
//!
//! Price history and statistics, adaptive thresholds, live spike detection, the tiered charging
//! policy with session tracking, the selling policy with its day-ahead planner, and the
//! asynchronous loop that connects them to the inverter, price and storage collaborators.

pub mod charging;
pub mod engine;
pub mod error;
pub mod pricing;
pub mod runtime;
pub mod selling;
pub mod spike;
pub mod state;
pub mod thresholds;
pub mod traits;

pub use charging::{ChargingDecisionEngine, ChargingInputs};
pub use engine::{CycleInputs, CycleOutcome, DecisionEngine};
pub use error::{CoreError, Result};
pub use pricing::{PriceCacheStore, PriceHistoryManager};
pub use runtime::{DecisionLoop, RuntimeHandle, StorageItem, TelemetryUpdate, start_runtime};
pub use selling::{SafetyReport, SellingDecisionEngine, SellingInputs, SellingScheduler};
pub use spike::PriceSpikeDetector;
pub use state::{ChargingState, EngineState, SellingState};
pub use thresholds::AdaptiveThresholdCalculator;
pub use traits::{DecisionStorage, InverterDataSource, PriceSource};
