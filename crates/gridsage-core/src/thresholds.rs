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

//! Adaptive high/critical price thresholds.
//!
//! Day-ahead prices swing several times over between seasons, so thresholds are derived from
//! recent statistics and scaled by a per-season multiplier.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use gridsage_types::config::{ThresholdConfig, season_for_month};
use gridsage_types::{AdaptiveThresholds, PriceStatistics, ThresholdMethod};
use tracing::{debug, warn};

/// Converts price statistics and the calendar date into charging thresholds
#[derive(Debug, Clone)]
pub struct AdaptiveThresholdCalculator {
    config: ThresholdConfig,
    tz: Tz,
}

impl AdaptiveThresholdCalculator {
    pub fn new(config: &ThresholdConfig, tz: Tz) -> Self {
        Self {
            config: config.clone(),
            tz,
        }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    fn local_month(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.tz).month()
    }

    /// Season whose month list contains the local month, "unknown" otherwise
    pub fn get_season_name(&self, now: DateTime<Utc>) -> String {
        season_for_month(&self.config.seasons, self.local_month(now))
            .map_or_else(|| "unknown".to_owned(), |s| s.name.clone())
    }

    /// Multiplier of the current season, 1.0 when none matches
    pub fn seasonal_multiplier(&self, now: DateTime<Utc>) -> f32 {
        season_for_month(&self.config.seasons, self.local_month(now)).map_or(1.0, |s| s.multiplier)
    }

    pub fn calculate_high_price_threshold(&self, stats: &PriceStatistics, now: DateTime<Utc>) -> f32 {
        if stats.sample_count == 0 {
            warn!(
                "No price statistics, using fallback high threshold {:.3}",
                self.config.fallback_high_price
            );
            return self.config.fallback_high_price;
        }

        let base = match self.config.method {
            ThresholdMethod::Multiplier => stats.median * self.config.high_multiplier,
            ThresholdMethod::Percentile => stats.percentile(self.config.high_percentile),
        };
        base * self.seasonal_multiplier(now)
    }

    pub fn calculate_critical_price_threshold(
        &self,
        stats: &PriceStatistics,
        now: DateTime<Utc>,
    ) -> f32 {
        if stats.sample_count == 0 {
            warn!(
                "No price statistics, using fallback critical threshold {:.3}",
                self.config.fallback_critical_price
            );
            return self.config.fallback_critical_price;
        }

        let base = match self.config.method {
            ThresholdMethod::Multiplier => stats.median * self.config.critical_multiplier,
            ThresholdMethod::Percentile => stats.percentile(self.config.critical_percentile),
        };
        base * self.seasonal_multiplier(now)
    }

    /// Both thresholds with their provenance
    pub fn calculate(&self, stats: &PriceStatistics, now: DateTime<Utc>) -> AdaptiveThresholds {
        let used_fallback = stats.sample_count == 0;
        let thresholds = AdaptiveThresholds {
            high_price: self.calculate_high_price_threshold(stats, now),
            critical_price: self.calculate_critical_price_threshold(stats, now),
            season: self.get_season_name(now),
            seasonal_multiplier: if used_fallback {
                1.0
            } else {
                self.seasonal_multiplier(now)
            },
            used_fallback,
        };

        debug!(
            "Adaptive thresholds ({}, x{:.2}): high {:.3}, critical {:.3}{}",
            thresholds.season,
            thresholds.seasonal_multiplier,
            thresholds.high_price,
            thresholds.critical_price,
            if used_fallback { " [fallback]" } else { "" }
        );
        thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::statistics::compute_statistics;
    use chrono::TimeZone;
    use gridsage_types::SeasonConfig;

    fn november() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 12, 12, 0, 0).unwrap()
    }

    fn stats() -> PriceStatistics {
        compute_statistics(&[0.2, 0.4, 0.6, 0.8, 1.0])
    }

    #[test]
    fn test_empty_statistics_use_fallbacks_exactly() {
        let config = ThresholdConfig::default();
        let calc = AdaptiveThresholdCalculator::new(&config, chrono_tz::Europe::Warsaw);
        let thresholds = calc.calculate(&PriceStatistics::empty(), november());

        assert_eq!(thresholds.high_price, config.fallback_high_price);
        assert_eq!(thresholds.critical_price, config.fallback_critical_price);
        assert!(thresholds.used_fallback);
    }

    #[test]
    fn test_winter_multiplier_applies_to_median() {
        let config = ThresholdConfig {
            high_multiplier: 1.0,
            seasons: vec![SeasonConfig::new("winter", &[11, 12, 1, 2], 2.0)],
            ..ThresholdConfig::default()
        };
        let calc = AdaptiveThresholdCalculator::new(&config, chrono_tz::Europe::Warsaw);
        let stats = stats();

        let high = calc.calculate_high_price_threshold(&stats, november());
        assert!((high - stats.median * 2.0).abs() < 1e-5);
        assert_eq!(calc.get_season_name(november()), "winter");
    }

    #[test]
    fn test_unknown_season_uses_unit_multiplier() {
        let config = ThresholdConfig {
            seasons: vec![SeasonConfig::new("summer", &[6, 7, 8], 0.5)],
            ..ThresholdConfig::default()
        };
        let calc = AdaptiveThresholdCalculator::new(&config, chrono_tz::Europe::Warsaw);

        assert_eq!(calc.get_season_name(november()), "unknown");
        assert_eq!(calc.seasonal_multiplier(november()), 1.0);
        let critical = calc.calculate_critical_price_threshold(&stats(), november());
        assert!((critical - 0.6 * 1.3).abs() < 1e-5);
    }

    #[test]
    fn test_percentile_method() {
        let config = ThresholdConfig {
            method: ThresholdMethod::Percentile,
            seasons: Vec::new(),
            ..ThresholdConfig::default()
        };
        let calc = AdaptiveThresholdCalculator::new(&config, chrono_tz::Europe::Warsaw);
        let stats = stats();

        assert!((calc.calculate_high_price_threshold(&stats, november()) - stats.p75).abs() < 1e-6);
        assert!(
            (calc.calculate_critical_price_threshold(&stats, november()) - stats.p50).abs() < 1e-6
        );
    }

    #[test]
    fn test_month_uses_local_timezone() {
        // 23:30 UTC on Oct 31 is already November in Warsaw
        let late_october = Utc.with_ymd_and_hms(2025, 10, 31, 23, 30, 0).unwrap();
        let calc =
            AdaptiveThresholdCalculator::new(&ThresholdConfig::default(), chrono_tz::Europe::Warsaw);
        assert_eq!(calc.get_season_name(late_october), "winter");
    }
}
