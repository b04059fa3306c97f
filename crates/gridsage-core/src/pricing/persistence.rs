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

//! Price cache persistence.
//!
//! The rolling window is snapshotted to a JSON file and reloaded at startup.

use chrono::{DateTime, Utc};
use gridsage_types::PriceSample;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

/// On-disk layout of the cache file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceCacheFile {
    pub saved_at: Option<DateTime<Utc>>,
    pub samples: Vec<PriceSample>,
}

/// Price cache file manager
#[derive(Debug, Clone)]
pub struct PriceCacheStore {
    path: PathBuf,
}

impl PriceCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load samples newer than `cutoff`, oldest first.
    ///
    /// A missing file yields an empty list.
    pub fn load(&self, cutoff: DateTime<Utc>) -> Result<Vec<PriceSample>> {
        if !self.path.exists() {
            info!(
                "Price cache not found at {}, starting empty",
                self.path.display()
            );
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        let file: PriceCacheFile = serde_json::from_str(&contents)?;

        let total = file.samples.len();
        let mut samples: Vec<PriceSample> = file
            .samples
            .into_iter()
            .filter(|s| s.timestamp >= cutoff && s.price >= 0.0)
            .collect();
        samples.sort_by_key(|s| s.timestamp);

        info!(
            "Loaded {} cached prices from {} ({} outside the lookback window dropped)",
            samples.len(),
            self.path.display(),
            total - samples.len()
        );
        Ok(samples)
    }

    /// Save samples atomically (temp file + rename)
    pub fn save(&self, samples: &[PriceSample]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let file = PriceCacheFile {
            saved_at: Some(Utc::now()),
            samples: samples.to_vec(),
        };
        let json = serde_json::to_string(&file)?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;

        debug!(
            "Saved {} prices to {}",
            samples.len(),
            self.path.display()
        );
        Ok(())
    }
}
