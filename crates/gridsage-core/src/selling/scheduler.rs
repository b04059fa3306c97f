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

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use gridsage_types::config::{BatteryConfig, SchedulerConfig, SellingConfig};
use gridsage_types::{DailySellingPlan, PeakQuality, PriceSample, SellingSession, SystemConfig};
use tracing::{debug, info, trace};

use crate::pricing::statistics::percentile_rank;
use crate::state::PlanBasis;

/// Allocations below this are not worth a session (kWh)
const MIN_SESSION_ENERGY_KWH: f32 = 0.1;

/// A local maximum of the forecast that survived suppression
#[derive(Debug, Clone, Copy)]
struct Peak {
    sample: PriceSample,
    quality: PeakQuality,
    evening: bool,
}

/// Builds the day-ahead multi-session sell plan
#[derive(Debug, Clone)]
pub struct SellingScheduler {
    config: SchedulerConfig,
    selling: SellingConfig,
    battery: BatteryConfig,
    tz: Tz,
}

impl SellingScheduler {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            config: config.scheduler.clone(),
            selling: config.selling.clone(),
            battery: config.battery.clone(),
            tz: config.tz(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }

    /// Quality tier from the peak's percentile rank in the forecast, None below the fair cut-off
    pub fn classify_peak(&self, price: f32, all_prices: &[f32]) -> Option<PeakQuality> {
        let rank = percentile_rank(price, all_prices);
        if rank >= self.config.excellent_percentile {
            Some(PeakQuality::Excellent)
        } else if rank >= self.config.good_percentile {
            Some(PeakQuality::Good)
        } else if rank >= self.config.fair_percentile {
            Some(PeakQuality::Fair)
        } else {
            None
        }
    }

    /// Local maxima at or above the minimum peak price, closer peaks suppressed in favour of the
    /// higher one. Returned in descending price order.
    pub fn find_peaks(&self, forecast: &[PriceSample]) -> Vec<PriceSample> {
        let n = forecast.len();
        let mut candidates: Vec<PriceSample> = forecast
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                let rises = *i == 0 || s.price > forecast[i - 1].price;
                let holds = *i + 1 == n || s.price >= forecast[i + 1].price;
                rises && holds && s.price >= self.config.min_peak_price
            })
            .map(|(_, s)| *s)
            .collect();

        candidates.sort_by(|a, b| {
            b.price
                .total_cmp(&a.price)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        let separation =
            Duration::minutes((self.config.min_peak_separation_hours * 60.0).round() as i64);
        let mut kept: Vec<PriceSample> = Vec::new();
        for candidate in candidates {
            let too_close = kept
                .iter()
                .any(|k| (k.timestamp - candidate.timestamp).abs() < separation);
            if too_close {
                trace!(
                    "Peak {:.3} at {} suppressed by a higher neighbour",
                    candidate.price,
                    candidate.timestamp
                );
            } else {
                kept.push(candidate);
            }
        }
        kept
    }

    /// Today's classified peaks that have not ended yet, with today's maximum forecast price.
    ///
    /// Quality is ranked against the whole forecast, not only today's slice.
    fn today_peaks(&self, forecast: &[PriceSample], now: DateTime<Utc>) -> (f32, Vec<Peak>) {
        let today = self.local_date(now);
        let duration = Duration::minutes(self.config.session_duration_minutes);

        let mut today_forecast: Vec<PriceSample> = forecast
            .iter()
            .filter(|s| self.local_date(s.timestamp) == today)
            .copied()
            .collect();
        today_forecast.sort_by_key(|s| s.timestamp);

        let all_prices: Vec<f32> = forecast.iter().map(|s| s.price).collect();
        let forecast_max_price = today_forecast
            .iter()
            .map(|s| s.price)
            .fold(f32::MIN, f32::max);

        let peaks = self
            .find_peaks(&today_forecast)
            .into_iter()
            .filter(|s| s.timestamp + duration > now)
            .filter_map(|sample| {
                let quality = self.classify_peak(sample.price, &all_prices)?;
                let hour = sample.timestamp.with_timezone(&self.tz).hour();
                Some(Peak {
                    sample,
                    quality,
                    evening: self.config.is_evening_hour(hour),
                })
            })
            .collect();

        (forecast_max_price, peaks)
    }

    /// Whether any peak left today would be worth selling into, whatever the battery holds
    pub fn has_sellable_peaks(&self, forecast: &[PriceSample], now: DateTime<Utc>) -> bool {
        !self.today_peaks(forecast, now).1.is_empty()
    }

    /// Build today's plan from the forecast.
    ///
    /// Returns None when no peak clears the minimum peak price or there is no energy above the
    /// safety margin to sell.
    pub fn generate_plan(
        &self,
        forecast: &[PriceSample],
        start_soc: f32,
        now: DateTime<Utc>,
    ) -> Option<DailySellingPlan> {
        let today = self.local_date(now);
        let duration = Duration::minutes(self.config.session_duration_minutes);

        let (forecast_max_price, mut peaks) = self.today_peaks(forecast, now);
        if peaks.is_empty() {
            debug!(
                "No qualifying peaks above {:.3} for {}",
                self.config.min_peak_price, today
            );
            return None;
        }

        let reserve_evening = self.config.reserve_evening_peak;
        peaks.sort_by(|a, b| {
            (reserve_evening && b.evening)
                .cmp(&(reserve_evening && a.evening))
                .then_with(|| b.quality.cmp(&a.quality))
                .then_with(|| b.sample.price.total_cmp(&a.sample.price))
        });

        let safety_margin = self.selling.safety_margin_soc;
        let mut remaining = self.battery.energy_between(safety_margin, start_soc);
        let session_cap = self.battery.max_discharge_rate_kw * duration.num_minutes() as f32 / 60.0;

        let mut selected: Vec<(Peak, f32, u32)> = Vec::new();
        for peak in peaks {
            if selected.len() >= self.config.max_sessions_per_day {
                break;
            }
            let start = peak.sample.timestamp;
            let overlaps = selected.iter().any(|(p, _, _)| {
                start < p.sample.timestamp + duration && p.sample.timestamp < start + duration
            });
            if overlaps {
                continue;
            }

            let energy = remaining.min(session_cap);
            if energy < MIN_SESSION_ENERGY_KWH {
                break;
            }
            remaining -= energy;
            let priority = selected.len() as u32 + 1;
            selected.push((peak, energy, priority));
        }

        if selected.is_empty() {
            debug!(
                "No energy above the {:.0}% safety margin at {:.1}% SOC, no sell plan",
                safety_margin, start_soc
            );
            return None;
        }

        selected.sort_by_key(|(p, _, _)| p.sample.timestamp);

        let capacity = self.battery.capacity_kwh.max(f32::EPSILON);
        let efficiency = self.battery.discharge_efficiency;
        let mut soc = start_soc;
        let sessions: Vec<SellingSession> = selected
            .iter()
            .enumerate()
            .map(|(i, (peak, energy, priority))| {
                soc = (soc - energy / capacity * 100.0).max(safety_margin);
                SellingSession {
                    id: format!("{}-{}", today.format("%Y-%m-%d"), i + 1),
                    start_time: peak.sample.timestamp,
                    duration_minutes: self.config.session_duration_minutes,
                    target_price: peak.sample.price,
                    peak_quality: peak.quality,
                    allocated_energy_kwh: *energy,
                    target_end_soc: soc,
                    expected_revenue: energy * peak.sample.price * efficiency,
                    priority: *priority,
                    confidence: quality_confidence(peak.quality),
                }
            })
            .collect();

        let total_energy_kwh: f32 = sessions.iter().map(|s| s.allocated_energy_kwh).sum();
        let total_expected_revenue: f32 = sessions.iter().map(|s| s.expected_revenue).sum();
        let confidence = if total_energy_kwh > 0.0 {
            sessions
                .iter()
                .map(|s| s.confidence * s.allocated_energy_kwh)
                .sum::<f32>()
                / total_energy_kwh
        } else {
            0.0
        };
        let battery_end_soc = sessions.last().map_or(start_soc, |s| s.target_end_soc);

        let reasoning = format!(
            "{} session(s) at {}, {:.2} kWh above the {:.0}% safety margin",
            sessions.len(),
            sessions
                .iter()
                .map(|s| format!(
                    "{} ({}, {:.3})",
                    s.start_time.with_timezone(&self.tz).format("%H:%M"),
                    s.peak_quality,
                    s.target_price
                ))
                .collect::<Vec<_>>()
                .join(", "),
            total_energy_kwh,
            safety_margin
        );

        info!(
            "📅 Sell plan for {}: {}, expected revenue {:.2}",
            today, reasoning, total_expected_revenue
        );

        Some(DailySellingPlan {
            date: today,
            sessions,
            total_energy_kwh,
            total_expected_revenue,
            battery_start_soc: start_soc,
            battery_end_soc,
            confidence,
            reasoning,
            generated_at: now,
            forecast_max_price,
        })
    }

    /// Whether the plan built from `basis` is stale for this forecast
    pub fn needs_regeneration(
        &self,
        basis: Option<&PlanBasis>,
        forecast: &[PriceSample],
        now: DateTime<Utc>,
    ) -> bool {
        let Some(basis) = basis else {
            return true;
        };
        let today = self.local_date(now);
        if basis.date != today {
            return true;
        }

        let current_max = forecast
            .iter()
            .filter(|s| self.local_date(s.timestamp) == today)
            .map(|s| s.price)
            .fold(None, |acc: Option<f32>, p| Some(acc.map_or(p, |a| a.max(p))));
        let Some(current_max) = current_max else {
            return false;
        };

        if basis.forecast_max_price <= 0.0 {
            return current_max > 0.0;
        }
        let change_percent =
            (current_max - basis.forecast_max_price).abs() / basis.forecast_max_price * 100.0;
        change_percent > self.config.regenerate_change_percent
    }

    /// Basis recorded for a plan generated from `forecast`
    pub fn basis_for(&self, forecast: &[PriceSample], now: DateTime<Utc>) -> PlanBasis {
        let today = self.local_date(now);
        let forecast_max_price = forecast
            .iter()
            .filter(|s| self.local_date(s.timestamp) == today)
            .map(|s| s.price)
            .fold(0.0, f32::max);
        PlanBasis {
            date: today,
            forecast_max_price,
        }
    }
}

fn quality_confidence(quality: PeakQuality) -> f32 {
    match quality {
        PeakQuality::Excellent => 0.9,
        PeakQuality::Good => 0.75,
        PeakQuality::Fair => 0.6,
    }
}
