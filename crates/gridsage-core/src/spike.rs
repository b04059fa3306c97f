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

//! Live price spike detection.
//!
//! Works on real-time ticks only, independent of the day-ahead forecast.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use gridsage_types::config::SpikeConfig;
use gridsage_types::{Spike, SpikeAction, SpikeLevel};
use ringbuffer::{AllocRingBuffer, RingBuffer};
use tracing::{debug, info, warn};

use crate::pricing::statistics::{median, std_dev};

/// Samples used for the stability part of the confidence score
const VARIANCE_WINDOW: usize = 10;

/// Sample count at which the sample-size part of the confidence saturates
const CONFIDENCE_FULL_SAMPLES: f32 = 20.0;

/// Classifies sudden jumps of the live price against its recent median
#[derive(Debug)]
pub struct PriceSpikeDetector {
    config: SpikeConfig,
    tz: Tz,
    history: AllocRingBuffer<(DateTime<Utc>, f32)>,
    last_spike: Option<Spike>,
    spikes_today: u32,
    day: Option<NaiveDate>,
}

impl PriceSpikeDetector {
    pub fn new(config: &SpikeConfig, tz: Tz) -> Self {
        Self {
            config: config.clone(),
            tz,
            history: AllocRingBuffer::new(config.history_capacity.max(1)),
            last_spike: None,
            spikes_today: 0,
            day: None,
        }
    }

    pub fn config(&self) -> &SpikeConfig {
        &self.config
    }

    /// Record the current price and classify it
    pub fn detect_spike(&mut self, current_price: f32) -> Option<Spike> {
        self.detect_spike_at(current_price, Utc::now())
    }

    pub fn detect_spike_at(&mut self, current_price: f32, now: DateTime<Utc>) -> Option<Spike> {
        self.reset_daily_if_needed(now);

        if current_price.is_nan() || current_price < 0.0 {
            warn!("Ignoring invalid live price {}", current_price);
            return None;
        }

        self.history.enqueue((now, current_price));

        if self.history.len() < self.config.min_price_samples {
            debug!(
                "Spike detection needs {} samples, have {}",
                self.config.min_price_samples,
                self.history.len()
            );
            return None;
        }

        let reference_price = self.reference_price(now);
        if reference_price <= 0.0 {
            debug!("Reference price {:.4} not positive, skipping spike check", reference_price);
            return None;
        }

        let percent_increase = (current_price - reference_price) / reference_price * 100.0;
        let level = self.classify(current_price, percent_increase);
        if level == SpikeLevel::None {
            return None;
        }

        let confidence = self.confidence(current_price, reference_price);
        let recommended_action = recommend(level, confidence);
        let reasoning = if current_price >= self.config.critical_price_threshold {
            format!(
                "price {:.3} at or above critical level {:.3} ({:+.1}% vs reference {:.3})",
                current_price,
                self.config.critical_price_threshold,
                percent_increase,
                reference_price
            )
        } else {
            format!(
                "price {:.3} is {:.1}% above reference {:.3} over the last {} min",
                current_price, percent_increase, reference_price, self.config.lookback_minutes
            )
        };

        let spike = Spike {
            level,
            current_price,
            reference_price,
            percent_increase,
            confidence,
            reasoning,
            recommended_action,
            detected_at: now,
        };

        self.spikes_today += 1;
        info!("⚡ Price spike detected: {} ({} today)", spike, self.spikes_today);
        self.last_spike = Some(spike.clone());
        Some(spike)
    }

    /// Median of samples in the lookback window, or of everything if the window is too thin
    fn reference_price(&self, now: DateTime<Utc>) -> f32 {
        let cutoff = now - Duration::minutes(self.config.lookback_minutes);
        let windowed: Vec<f32> = self
            .history
            .iter()
            .filter(|(t, _)| *t >= cutoff)
            .map(|(_, p)| *p)
            .collect();

        if windowed.len() >= 2 {
            median(&windowed)
        } else {
            let all: Vec<f32> = self.history.iter().map(|(_, p)| *p).collect();
            median(&all)
        }
    }

    /// Absolute price first, then percent bands
    fn classify(&self, current_price: f32, percent_increase: f32) -> SpikeLevel {
        if current_price >= self.config.critical_price_threshold
            || percent_increase >= self.config.extreme_spike_percent
        {
            SpikeLevel::Extreme
        } else if percent_increase >= self.config.high_spike_percent {
            SpikeLevel::High
        } else if percent_increase >= self.config.moderate_spike_percent {
            SpikeLevel::Moderate
        } else {
            SpikeLevel::None
        }
    }

    fn confidence(&self, current_price: f32, reference_price: f32) -> f32 {
        let sample_factor = (self.history.len() as f32 / CONFIDENCE_FULL_SAMPLES).min(1.0);
        let magnitude_factor = ((current_price / reference_price - 1.0) / 0.5).clamp(0.0, 1.0);

        let recent: Vec<f32> = self
            .history
            .iter()
            .rev()
            .take(VARIANCE_WINDOW)
            .map(|(_, p)| *p)
            .collect();
        let variance_factor = stability_score(std_dev(&recent));

        (0.3 * sample_factor + 0.5 * magnitude_factor + 0.2 * variance_factor).clamp(0.0, 1.0)
    }

    /// Spike detected within the last `max_age_minutes`
    pub fn is_spike_active(&self, max_age_minutes: i64) -> bool {
        self.is_spike_active_at(Utc::now(), max_age_minutes)
    }

    pub fn is_spike_active_at(&self, now: DateTime<Utc>, max_age_minutes: i64) -> bool {
        self.active_spike(now, max_age_minutes).is_some()
    }

    /// Last spike if it is still within the age window
    pub fn active_spike(&self, now: DateTime<Utc>, max_age_minutes: i64) -> Option<&Spike> {
        self.last_spike
            .as_ref()
            .filter(|s| s.detected_at <= now && s.age_minutes(now) <= max_age_minutes)
    }

    pub fn last_spike(&self) -> Option<&Spike> {
        self.last_spike.as_ref()
    }

    pub fn spikes_today(&self) -> u32 {
        self.spikes_today
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// Reset the daily counter at local midnight
    pub fn reset_daily_if_needed(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&self.tz).date_naive();
        if self.day != Some(today) {
            if self.day.is_some() && self.spikes_today > 0 {
                debug!("New day, resetting spike counter ({} yesterday)", self.spikes_today);
            }
            self.day = Some(today);
            self.spikes_today = 0;
        }
    }

    /// Forget samples, last spike and counter
    pub fn clear(&mut self) {
        self.history.clear();
        self.last_spike = None;
        self.spikes_today = 0;
    }
}

/// Map the std dev of recent prices to a 0.4-1.0 stability score
fn stability_score(std_dev: f32) -> f32 {
    if std_dev <= 0.05 {
        1.0
    } else if std_dev <= 0.10 {
        0.8
    } else if std_dev <= 0.20 {
        0.6
    } else {
        0.4
    }
}

fn recommend(level: SpikeLevel, confidence: f32) -> SpikeAction {
    match level {
        SpikeLevel::Extreme => SpikeAction::SellImmediately,
        SpikeLevel::High if confidence >= 0.8 => SpikeAction::SellNow,
        SpikeLevel::High => SpikeAction::ConsiderSelling,
        SpikeLevel::Moderate if confidence >= 0.7 => SpikeAction::Evaluate,
        SpikeLevel::Moderate | SpikeLevel::None => SpikeAction::Monitor,
    }
}
