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

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============= Selling Plan =============

/// Quality tier of a forecast price peak, by percentile rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakQuality {
    Fair,
    Good,
    Excellent,
}

impl fmt::Display for PeakQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fair => write!(f, "fair"),
            Self::Good => write!(f, "good"),
            Self::Excellent => write!(f, "excellent"),
        }
    }
}

/// One planned discharge window, immutable once planned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellingSession {
    /// Stable id within the plan, e.g. "2025-11-03-1"
    pub id: String,

    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,

    /// Forecast price at the peak
    pub target_price: f32,

    pub peak_quality: PeakQuality,

    /// Energy to discharge during this session (kWh)
    pub allocated_energy_kwh: f32,

    /// Projected SOC after this session (never below the safety margin)
    pub target_end_soc: f32,

    pub expected_revenue: f32,

    /// 1 = highest
    pub priority: u32,

    /// 0.0-1.0
    pub confidence: f32,
}

impl SellingSession {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(self.duration_minutes)
    }

    /// Whether `now` falls inside the session window
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time && now < self.end_time()
    }

    pub fn overlaps(&self, other: &SellingSession) -> bool {
        self.start_time < other.end_time() && other.start_time < self.end_time()
    }
}

/// Day-ahead discharge plan, one per local calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySellingPlan {
    /// Local date the plan covers
    pub date: NaiveDate,

    /// Sessions ordered by start time
    pub sessions: Vec<SellingSession>,

    pub total_energy_kwh: f32,
    pub total_expected_revenue: f32,

    pub battery_start_soc: f32,

    /// Projected SOC after the last session
    pub battery_end_soc: f32,

    /// 0.0-1.0
    pub confidence: f32,

    pub reasoning: String,

    pub generated_at: DateTime<Utc>,

    /// Maximum forecast price the plan was built from
    pub forecast_max_price: f32,
}

impl DailySellingPlan {
    /// Session whose window contains `now`
    pub fn session_at(&self, now: DateTime<Utc>) -> Option<&SellingSession> {
        self.sessions.iter().find(|s| s.is_due(now))
    }

    /// Sessions that have not started yet
    pub fn upcoming(&self, now: DateTime<Utc>) -> impl Iterator<Item = &SellingSession> {
        self.sessions.iter().filter(move |s| s.start_time > now)
    }

    pub fn session(&self, id: &str) -> Option<&SellingSession> {
        self.sessions.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(id: &str, hour: u32) -> SellingSession {
        SellingSession {
            id: id.to_owned(),
            start_time: Utc.with_ymd_and_hms(2025, 11, 3, hour, 0, 0).unwrap(),
            duration_minutes: 60,
            target_price: 1.2,
            peak_quality: PeakQuality::Good,
            allocated_energy_kwh: 1.5,
            target_end_soc: 70.0,
            expected_revenue: 1.71,
            priority: 1,
            confidence: 0.8,
        }
    }

    #[test]
    fn test_session_window() {
        let s = session("a", 17);
        assert!(s.is_due(Utc.with_ymd_and_hms(2025, 11, 3, 17, 30, 0).unwrap()));
        assert!(!s.is_due(Utc.with_ymd_and_hms(2025, 11, 3, 18, 0, 0).unwrap()));
        assert!(s.overlaps(&session("b", 17)));
        assert!(!s.overlaps(&session("c", 18)));
    }

    #[test]
    fn test_quality_ordering() {
        assert!(PeakQuality::Excellent > PeakQuality::Good);
        assert!(PeakQuality::Good > PeakQuality::Fair);
    }
}
