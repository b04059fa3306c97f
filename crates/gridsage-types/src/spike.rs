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

/// Severity of a live price excursion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikeLevel {
    None,
    Moderate,
    High,
    Extreme,
}

impl SpikeLevel {
    /// High and extreme spikes may trigger selling outside the daily plan
    pub fn is_sell_trigger(self) -> bool {
        matches!(self, Self::High | Self::Extreme)
    }
}

impl fmt::Display for SpikeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
            Self::Extreme => write!(f, "extreme"),
        }
    }
}

/// What the detector suggests doing about a spike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeAction {
    SellImmediately,
    SellNow,
    ConsiderSelling,
    Evaluate,
    Monitor,
}

impl fmt::Display for SpikeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SellImmediately => write!(f, "sell immediately"),
            Self::SellNow => write!(f, "sell now"),
            Self::ConsiderSelling => write!(f, "consider selling"),
            Self::Evaluate => write!(f, "evaluate"),
            Self::Monitor => write!(f, "monitor"),
        }
    }
}

/// A classified live price spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub level: SpikeLevel,
    pub current_price: f32,

    /// Median of recent samples the current price is compared against
    pub reference_price: f32,

    pub percent_increase: f32,

    /// 0.0-1.0
    pub confidence: f32,

    pub reasoning: String,
    pub recommended_action: SpikeAction,
    pub detected_at: DateTime<Utc>,
}

impl Spike {
    /// Minutes elapsed since detection
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.detected_at).num_minutes()
    }
}

impl fmt::Display for Spike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} spike {:.3} vs {:.3} (+{:.1}%, confidence {:.2}): {}",
            self.level,
            self.current_price,
            self.reference_price,
            self.percent_increase,
            self.confidence,
            self.recommended_action
        )
    }
}
