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

use anyhow::Result;
use async_trait::async_trait;
use gridsage_types::{
    BatterySnapshot, DecisionRecord, InverterCommand, PowerFlowSnapshot, PriceUpdate, PvOutlook,
    SessionRecord,
};

/// Hardware side: telemetry reads and command execution
#[async_trait]
pub trait InverterDataSource: Send + Sync {
    /// Read the current battery state
    async fn read_battery(&self) -> Result<BatterySnapshot>;

    /// Read the current household power flow
    async fn read_power_flow(&self) -> Result<PowerFlowSnapshot>;

    /// Short-term PV outlook, unknown by default
    async fn pv_outlook(&self) -> Result<PvOutlook> {
        Ok(PvOutlook::default())
    }

    /// Execute a charge/sell command
    async fn send_command(&self, command: &InverterCommand) -> Result<()>;

    /// Get data source name for logging
    fn name(&self) -> &str;
}

/// Market side: current final price, forecast and tariff band
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(&self) -> Result<PriceUpdate>;

    /// Get data source name for logging
    fn name(&self) -> &str;
}

/// Durable storage of decisions and closed sessions
#[async_trait]
pub trait DecisionStorage: Send + Sync {
    async fn store_decision(&self, record: &DecisionRecord) -> Result<()>;

    async fn store_session(&self, record: &SessionRecord) -> Result<()>;
}
