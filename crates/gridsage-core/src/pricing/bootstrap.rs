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

//! Seed the price history from stored decision records.
//!
//! Records written by older releases used different field names for the price; they are tried
//! in priority order.

use chrono::{DateTime, Utc};
use gridsage_types::PriceSample;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

/// Price field names, highest priority first
pub const LEGACY_PRICE_FIELDS: [&str; 5] = [
    "final_price_pln",
    "current_price_pln",
    "price_pln_kwh",
    "price",
    "current_price",
];

/// Price of a record, from the first legacy field holding a number
///
/// Also looks into a nested `price_data` object.
pub fn extract_price(record: &Value) -> Option<f32> {
    let direct = LEGACY_PRICE_FIELDS
        .iter()
        .find_map(|field| record.get(*field).and_then(Value::as_f64));

    direct
        .or_else(|| {
            let nested = record.get("price_data")?;
            LEGACY_PRICE_FIELDS
                .iter()
                .find_map(|field| nested.get(*field).and_then(Value::as_f64))
        })
        .map(|p| p as f32)
}

/// RFC 3339 `timestamp` of a record
pub fn extract_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    let raw = record.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Collect (timestamp, price) samples newer than `cutoff` from every `*.json` file in `dir`.
///
/// Files may contain one record, an array of records or one record per line. Unreadable files
/// are skipped with a warning; a missing directory yields an empty list.
pub fn load_decision_prices(dir: &Path, cutoff: DateTime<Utc>) -> Result<Vec<PriceSample>> {
    if !dir.exists() {
        debug!("Decision record directory {} not found", dir.display());
        return Ok(Vec::new());
    }

    let mut samples = Vec::new();
    let mut files = 0usize;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }

        match read_records(&path) {
            Ok(records) => {
                files += 1;
                samples.extend(records.iter().filter_map(|record| {
                    let timestamp = extract_timestamp(record)?;
                    let price = extract_price(record)?;
                    (timestamp >= cutoff && price >= 0.0)
                        .then(|| PriceSample::new(timestamp, price))
                }));
            }
            Err(e) => warn!("Skipping decision record file: {e}"),
        }
    }

    samples.sort_by_key(|s| s.timestamp);
    samples.dedup_by_key(|s| s.timestamp);

    info!(
        "Bootstrapped {} historical prices from {} decision files",
        samples.len(),
        files
    );
    Ok(samples)
}

fn read_records(path: &Path) -> Result<Vec<Value>> {
    let contents = fs::read_to_string(path)?;
    let bootstrap_error = |message: String| CoreError::Bootstrap {
        path: path.display().to_string(),
        message,
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Array(records)) => Ok(records),
        Ok(record @ Value::Object(_)) => Ok(vec![record]),
        Ok(other) => Err(bootstrap_error(format!("unexpected JSON value: {other}"))),
        // JSON lines
        Err(_) => contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| bootstrap_error(e.to_string())))
            .collect(),
    }
}
