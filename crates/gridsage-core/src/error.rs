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

//! Error types for the core crate
//!
//! Decision evaluation never fails; these cover the I/O edges only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("price cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("price cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bootstrap error in {path}: {message}")]
    Bootstrap { path: String, message: String },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, CoreError>;
