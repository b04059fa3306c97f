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

//! Order statistics over price samples.
//!
//! Percentiles use linear interpolation between order statistics (R-7): for a fraction `p`
//! the index is `k = (n - 1) * p`, interpolated between `floor(k)` and `ceil(k)`.

use gridsage_types::PriceStatistics;

/// Sort a copy of the values, dropping NaNs
pub fn sorted(values: &[f32]) -> Vec<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f32::total_cmp);
    sorted
}

/// R-7 percentile of already sorted values, `fraction` in 0.0-1.0
///
/// Returns 0.0 for an empty slice.
pub fn percentile_sorted(sorted: &[f32], fraction: f32) -> f32 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let k = (n - 1) as f32 * fraction.clamp(0.0, 1.0);
            let lower = k.floor() as usize;
            let upper = k.ceil() as usize;
            if lower == upper {
                sorted[lower]
            } else {
                let weight = k - lower as f32;
                sorted[lower] + (sorted[upper] - sorted[lower]) * weight
            }
        }
    }
}

/// Median of unsorted values, 0.0 when empty
pub fn median(values: &[f32]) -> f32 {
    percentile_sorted(&sorted(values), 0.5)
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation, 0.0 for fewer than two values
pub fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

/// Share of values strictly below `value`, as a percentage 0-100
pub fn percentile_rank(value: f32, values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let below = values.iter().filter(|v| **v < value).count();
    below as f32 * 100.0 / values.len() as f32
}

/// Full statistics; all zeros with `sample_count == 0` for empty input
pub fn compute_statistics(values: &[f32]) -> PriceStatistics {
    let sorted = sorted(values);
    if sorted.is_empty() {
        return PriceStatistics::empty();
    }

    let p50 = percentile_sorted(&sorted, 0.50);
    PriceStatistics {
        median: p50,
        mean: mean(&sorted),
        p25: percentile_sorted(&sorted, 0.25),
        p50,
        p75: percentile_sorted(&sorted, 0.75),
        p90: percentile_sorted(&sorted, 0.90),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        sample_count: sorted.len(),
    }
}
