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

//! Rolling price window with distribution statistics.

use chrono::{DateTime, Duration, Utc};
use gridsage_types::config::PriceHistoryConfig;
use gridsage_types::{PriceSample, PriceStatistics, SystemConfig};
use parking_lot::RwLock;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use std::path::Path;
use tracing::{debug, error, info, trace, warn};

use super::bootstrap::load_decision_prices;
use super::persistence::PriceCacheStore;
use super::statistics::{compute_statistics, mean};
use crate::error::Result;

struct HistoryInner {
    samples: AllocRingBuffer<PriceSample>,
    inserts_since_flush: u32,
}

/// Bounded, time-ordered cache of observed prices
///
/// Capacity is `lookback_days × samples_per_day`; the oldest sample is evicted on overflow.
/// One writer (the price poller) and any number of readers share it behind a read/write lock;
/// readers snapshot under the read lock and compute outside it.
pub struct PriceHistoryManager {
    config: PriceHistoryConfig,
    inner: RwLock<HistoryInner>,
    store: Option<PriceCacheStore>,
}

impl std::fmt::Debug for PriceHistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceHistoryManager")
            .field("capacity", &self.config.capacity())
            .field("len", &self.len())
            .field("store", &self.store)
            .finish()
    }
}

impl PriceHistoryManager {
    /// In-memory history without persistence
    pub fn new(config: &PriceHistoryConfig) -> Self {
        Self {
            config: config.clone(),
            inner: RwLock::new(HistoryInner {
                samples: AllocRingBuffer::new(config.capacity()),
                inserts_since_flush: 0,
            }),
            store: None,
        }
    }

    /// History persisted to `store` every `flush_every` inserts
    pub fn with_store(config: &PriceHistoryConfig, store: PriceCacheStore) -> Self {
        Self {
            store: Some(store),
            ..Self::new(config)
        }
    }

    /// History persisted to the configured cache path
    pub fn from_system_config(config: &SystemConfig) -> Self {
        Self::with_store(
            &config.price_history,
            PriceCacheStore::new(config.price_cache_path()),
        )
    }

    pub fn config(&self) -> &PriceHistoryConfig {
        &self.config
    }

    fn lookback(&self) -> Duration {
        Duration::days(i64::from(self.config.lookback_days))
    }

    /// Append a sample. Negative or NaN prices are logged and dropped.
    ///
    /// Returns whether the sample was accepted.
    pub fn add_price_point(&self, timestamp: DateTime<Utc>, price: f32) -> bool {
        if price.is_nan() || price < 0.0 {
            warn!("Rejecting invalid price {} at {}", price, timestamp);
            return false;
        }

        let flush_due = {
            let mut inner = self.inner.write();
            inner.samples.enqueue(PriceSample::new(timestamp, price));
            inner.inserts_since_flush += 1;
            if inner.inserts_since_flush >= self.config.flush_every {
                inner.inserts_since_flush = 0;
                true
            } else {
                false
            }
        };
        trace!("Price point {:.4} at {} added", price, timestamp);

        if flush_due {
            self.flush_in_background();
        }
        true
    }

    /// Prices with timestamp >= now - hours (default: the full lookback window), unordered
    pub fn get_recent_prices(&self, hours: Option<i64>) -> Vec<f32> {
        self.get_recent_prices_at(Utc::now(), hours)
    }

    pub fn get_recent_prices_at(&self, now: DateTime<Utc>, hours: Option<i64>) -> Vec<f32> {
        let window = hours.map_or_else(|| self.lookback(), Duration::hours);
        let cutoff = now - window;
        self.inner
            .read()
            .samples
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .map(|s| s.price)
            .collect()
    }

    /// Statistics over the lookback window; all zeros when empty
    pub fn calculate_statistics(&self) -> PriceStatistics {
        self.calculate_statistics_at(Utc::now())
    }

    pub fn calculate_statistics_at(&self, now: DateTime<Utc>) -> PriceStatistics {
        let prices = self.get_recent_prices_at(now, None);
        let stats = compute_statistics(&prices);
        if stats.is_empty() {
            debug!("Price history empty, returning zero statistics");
        } else {
            debug!(
                "Price statistics over {} samples: median {:.3}, p25 {:.3}, p75 {:.3}",
                stats.sample_count, stats.median, stats.p25, stats.p75
            );
        }
        stats
    }

    /// Mean price over the last `hours`, None without samples
    pub fn rolling_average(&self, hours: i64) -> Option<f32> {
        self.rolling_average_at(Utc::now(), hours)
    }

    pub fn rolling_average_at(&self, now: DateTime<Utc>, hours: i64) -> Option<f32> {
        let prices = self.get_recent_prices_at(now, Some(hours));
        (!prices.is_empty()).then(|| mean(&prices))
    }

    /// Enough samples for valid statistics
    pub fn has_sufficient_data(&self) -> bool {
        self.len() >= self.config.min_valid_samples
    }

    pub fn len(&self) -> usize {
        self.inner.read().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().samples.is_empty()
    }

    /// Most recently added sample
    pub fn latest(&self) -> Option<PriceSample> {
        self.inner.read().samples.back().copied()
    }

    /// Copy of all samples, in insertion order
    pub fn snapshot(&self) -> Vec<PriceSample> {
        self.inner.read().samples.iter().copied().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.samples.clear();
        inner.inserts_since_flush = 0;
    }

    /// Merge samples into the window, keeping time order and the newest `capacity` entries
    fn seed(&self, mut incoming: Vec<PriceSample>) -> usize {
        incoming.retain(|s| s.price >= 0.0);
        if incoming.is_empty() {
            return 0;
        }
        let added = incoming.len();

        let mut inner = self.inner.write();
        let mut merged: Vec<PriceSample> = inner.samples.iter().copied().collect();
        merged.extend(incoming);
        merged.sort_by_key(|s| s.timestamp);
        merged.dedup_by_key(|s| s.timestamp);

        inner.samples.clear();
        let skip = merged.len().saturating_sub(self.config.capacity());
        for sample in merged.into_iter().skip(skip) {
            inner.samples.enqueue(sample);
        }
        added
    }

    /// Reload the persisted cache, dropping entries older than the lookback window
    pub fn load_from_store(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let samples = store.load(now - self.lookback())?;
        Ok(self.seed(samples))
    }

    /// Seed from stored decision records (used once at startup)
    pub fn load_historical_from_files(&self, dir: &Path, now: DateTime<Utc>) -> Result<usize> {
        let samples = load_decision_prices(dir, now - self.lookback())?;
        let added = self.seed(samples);
        info!(
            "Price history seeded with {} historical samples ({} total)",
            added,
            self.len()
        );
        Ok(added)
    }

    /// Write the current window to the store
    pub fn flush(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.save(&self.snapshot()),
            None => Ok(()),
        }
    }

    /// Persist without blocking the caller; failures are only logged
    fn flush_in_background(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let snapshot = self.snapshot();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = store.save(&snapshot) {
                        error!("Failed to persist price history: {e}");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = store.save(&snapshot) {
                    error!("Failed to persist price history: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> PriceHistoryConfig {
        PriceHistoryConfig::default()
    }

    #[test]
    fn test_negative_price_rejected() {
        let history = PriceHistoryManager::new(&config());
        assert!(!history.add_price_point(Utc::now(), -0.1));
        assert!(!history.add_price_point(Utc::now(), f32::NAN));
        assert!(history.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cfg = PriceHistoryConfig {
            lookback_days: 1,
            samples_per_day: 4,
            ..config()
        };
        let history = PriceHistoryManager::new(&cfg);
        let now = Utc::now();
        for i in 0..6 {
            history.add_price_point(now - Duration::minutes(60 - i * 10), i as f32);
        }

        assert_eq!(history.len(), 4);
        let prices: Vec<f32> = history.snapshot().iter().map(|s| s.price).collect();
        assert_eq!(prices, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(history.latest().map(|s| s.price), Some(5.0));
    }

    #[test]
    fn test_empty_statistics_are_zero() {
        let history = PriceHistoryManager::new(&config());
        let stats = history.calculate_statistics();
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.median, 0.0);
        assert_eq!(stats.p90, 0.0);
        assert!(history.rolling_average(24).is_none());
        assert!(!history.has_sufficient_data());
    }

    #[test]
    fn test_recent_prices_window() {
        let history = PriceHistoryManager::new(&config());
        let now = Utc::now();
        history.add_price_point(now - Duration::hours(30), 1.0);
        history.add_price_point(now - Duration::hours(3), 0.5);
        history.add_price_point(now - Duration::hours(1), 0.7);

        assert_eq!(history.get_recent_prices_at(now, Some(4)).len(), 2);
        assert_eq!(history.get_recent_prices_at(now, None).len(), 3);
        let avg = history.rolling_average_at(now, 4).unwrap();
        assert!((avg - 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_statistics_ignore_samples_outside_lookback() {
        let history = PriceHistoryManager::new(&config());
        let now = Utc::now();
        history.add_price_point(now - Duration::days(8), 100.0);
        for i in 0..4 {
            history.add_price_point(now - Duration::hours(i), 0.5);
        }
        let stats = history.calculate_statistics_at(now);
        assert_eq!(stats.sample_count, 4);
        assert!((stats.max - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_flush_every_n_inserts() {
        let dir = TempDir::new().unwrap();
        let store = PriceCacheStore::new(dir.path().join("prices.json"));
        let history = PriceHistoryManager::with_store(&config(), store.clone());
        let now = Utc::now();

        for i in 0..9 {
            history.add_price_point(now - Duration::minutes(15 * (10 - i)), 0.4);
        }
        assert!(!store.exists());

        history.add_price_point(now, 0.4);
        assert!(store.exists());

        let reloaded = PriceHistoryManager::with_store(&config(), store);
        assert_eq!(reloaded.load_from_store(now).unwrap(), 10);
        assert_eq!(reloaded.len(), 10);
    }
}
