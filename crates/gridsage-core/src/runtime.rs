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

//! Asynchronous host for the decision loop.
//!
//! Pollers talk to the collaborators and push their results through bounded channels; the
//! decision loop drains them on each tick and runs one synchronous engine cycle. Commands and
//! records leave through mpsc channels to writer tasks, so the loop never awaits I/O.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use futures_timer::Delay;
use gridsage_types::{
    BatterySnapshot, DecisionRecord, InverterCommand, PowerFlowSnapshot, PriceUpdate, PvOutlook,
    SessionRecord, SystemConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{CycleInputs, CycleOutcome, DecisionEngine};
use crate::error::{CoreError, Result};
use crate::pricing::PriceHistoryManager;
use crate::state::EngineState;
use crate::traits::{DecisionStorage, InverterDataSource, PriceSource};

/// Channel capacity for telemetry updates
const TELEMETRY_CHANNEL_CAPACITY: usize = 10;

/// Channel capacity for price updates
const PRICE_CHANNEL_CAPACITY: usize = 10;

/// Channel capacity for inverter commands
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Channel capacity for storage records
const STORAGE_CHANNEL_CAPACITY: usize = 256;

/// One telemetry poll
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryUpdate {
    pub battery: BatterySnapshot,
    pub power: PowerFlowSnapshot,
    pub pv_outlook: PvOutlook,
}

/// Item for the storage writer
#[derive(Debug, Clone, PartialEq)]
pub enum StorageItem {
    Decision(DecisionRecord),
    Session(SessionRecord),
}

fn send_latest<T>(tx: &Sender<T>, value: T, what: &str) {
    match tx.try_send(value) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!("{what} channel full, dropping update"),
        Err(TrySendError::Disconnected(_)) => warn!("{what} channel disconnected"),
    }
}

/// Wait for `period` or shutdown. Returns true when shutdown was requested.
async fn sleep_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = Delay::new(period) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn read_telemetry(source: &dyn InverterDataSource) -> anyhow::Result<TelemetryUpdate> {
    let battery = source.read_battery().await?;
    let power = source.read_power_flow().await?;
    let pv_outlook = source.pv_outlook().await.unwrap_or_else(|e| {
        warn!("PV outlook unavailable from {}: {e}", source.name());
        PvOutlook::default()
    });
    Ok(TelemetryUpdate {
        battery,
        power,
        pv_outlook,
    })
}

/// Spawns the telemetry poller worker task
pub fn spawn_telemetry_poller(
    source: Arc<dyn InverterDataSource>,
    period: Duration,
    tx: Sender<TelemetryUpdate>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("🔋 Telemetry poller started ({})", source.name());
        loop {
            match read_telemetry(source.as_ref()).await {
                Ok(update) => {
                    debug!("Telemetry: SOC {:.1}%", update.battery.soc());
                    send_latest(&tx, update, "telemetry");
                }
                Err(e) => error!("❌ Failed to read telemetry from {}: {e}", source.name()),
            }
            if sleep_or_shutdown(period, &mut shutdown).await {
                break;
            }
        }
        info!("Telemetry poller stopped");
    })
}

/// Spawns the price poller worker task. Current prices also feed the price history.
pub fn spawn_price_poller(
    source: Arc<dyn PriceSource>,
    history: Arc<PriceHistoryManager>,
    period: Duration,
    tx: Sender<PriceUpdate>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("💶 Price poller started ({})", source.name());
        loop {
            match source.fetch_prices().await {
                Ok(update) => {
                    if let Some(current) = update.current {
                        history.add_price_point(current.timestamp, current.price);
                    }
                    debug!(
                        "Prices: current {:?}, {} forecast samples",
                        update.current.map(|c| c.price),
                        update.forecast.len()
                    );
                    send_latest(&tx, update, "price");
                }
                Err(e) => error!("❌ Failed to fetch prices from {}: {e}", source.name()),
            }
            if sleep_or_shutdown(period, &mut shutdown).await {
                break;
            }
        }
        info!("Price poller stopped");
    })
}

/// Spawns the task that forwards commands to the inverter, in order
pub fn spawn_command_writer(
    inverter: Arc<dyn InverterDataSource>,
    mut rx: mpsc::Receiver<InverterCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            info!("📤 Sending {} to {}", command, inverter.name());
            if let Err(e) = inverter.send_command(&command).await {
                error!("❌ Command {} failed: {e}", command);
            }
        }
        debug!("Command writer stopped");
    })
}

/// Spawns the task that persists decision and session records
pub fn spawn_storage_writer(
    storage: Arc<dyn DecisionStorage>,
    mut rx: mpsc::Receiver<StorageItem>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let result = match &item {
                StorageItem::Decision(record) => storage.store_decision(record).await,
                StorageItem::Session(record) => storage.store_session(record).await,
            };
            if let Err(e) = result {
                warn!("Failed to store record: {e}");
            }
        }
        debug!("Storage writer stopped");
    })
}

/// The single logical decision loop
#[derive(Debug)]
pub struct DecisionLoop {
    engine: DecisionEngine,
    state: EngineState,
    history: Arc<PriceHistoryManager>,
    telemetry_rx: Receiver<TelemetryUpdate>,
    price_rx: Receiver<PriceUpdate>,
    command_tx: mpsc::Sender<InverterCommand>,
    storage_tx: mpsc::Sender<StorageItem>,
    latest_telemetry: Option<TelemetryUpdate>,
    latest_prices: Option<PriceUpdate>,
    dry_run: bool,
}

impl DecisionLoop {
    pub fn new(
        config: &SystemConfig,
        history: Arc<PriceHistoryManager>,
        telemetry_rx: Receiver<TelemetryUpdate>,
        price_rx: Receiver<PriceUpdate>,
        command_tx: mpsc::Sender<InverterCommand>,
        storage_tx: mpsc::Sender<StorageItem>,
    ) -> Self {
        let engine = DecisionEngine::new(config);
        let state = engine.new_state();
        Self {
            engine,
            state,
            history,
            telemetry_rx,
            price_rx,
            command_tx,
            storage_tx,
            latest_telemetry: None,
            latest_prices: None,
            dry_run: config.system.dry_run,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Keep only the newest value from each channel
    fn drain(&mut self) {
        while let Ok(update) = self.telemetry_rx.try_recv() {
            self.latest_telemetry = Some(update);
        }
        while let Ok(update) = self.price_rx.try_recv() {
            self.latest_prices = Some(update);
        }
    }

    /// Run one cycle on the latest data. No-op while telemetry or prices are missing.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<CycleOutcome> {
        self.drain();

        let (Some(telemetry), Some(prices)) = (&self.latest_telemetry, &self.latest_prices) else {
            debug!("Waiting for telemetry and prices before deciding");
            return None;
        };

        let inputs = CycleInputs {
            now,
            battery: telemetry.battery.clone(),
            power: telemetry.power.clone(),
            prices: prices.clone(),
            pv_outlook: telemetry.pv_outlook,
        };
        let outcome = self.engine.run_cycle(&mut self.state, &self.history, &inputs);

        if let Err(e) = self.dispatch(&outcome) {
            warn!("Decision output not delivered: {e}");
        }
        Some(outcome)
    }

    fn dispatch(&self, outcome: &CycleOutcome) -> Result<()> {
        if self.dry_run {
            for command in &outcome.decision.commands {
                info!("🔍 Dry run, not sending {}", command);
            }
        } else {
            for command in &outcome.decision.commands {
                self.command_tx
                    .try_send(command.clone())
                    .map_err(|_| CoreError::ChannelClosed("inverter commands"))?;
            }
        }

        let records = std::iter::once(StorageItem::Decision(outcome.record.clone())).chain(
            outcome
                .sessions
                .iter()
                .cloned()
                .map(StorageItem::Session),
        );
        for item in records {
            self.storage_tx
                .try_send(item)
                .map_err(|_| CoreError::ChannelClosed("storage records"))?;
        }
        Ok(())
    }

    /// Tick every `period` until shutdown, then flush the price history
    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("🚀 Decision loop started, period {}s", period.as_secs());
        loop {
            self.tick(Utc::now());
            if sleep_or_shutdown(period, &mut shutdown).await {
                break;
            }
        }
        if let Err(e) = self.history.flush() {
            error!("Failed to persist price history on shutdown: {e}");
        }
        info!("Decision loop stopped");
    }
}

/// Running pollers, writers and decision loop
#[derive(Debug)]
pub struct RuntimeHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Signal shutdown and wait for every task to finish
    pub async fn shutdown(self) {
        info!("Shutting down decision runtime");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Runtime task ended abnormally: {e}");
            }
        }
    }
}

/// Wire collaborators, channels and the decision loop, and spawn everything.
///
/// Must be called inside a tokio runtime.
pub fn start_runtime(
    config: &SystemConfig,
    history: Arc<PriceHistoryManager>,
    inverter: Arc<dyn InverterDataSource>,
    prices: Arc<dyn PriceSource>,
    storage: Arc<dyn DecisionStorage>,
) -> RuntimeHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (telemetry_tx, telemetry_rx) = crossbeam_channel::bounded(TELEMETRY_CHANNEL_CAPACITY);
    let (price_tx, price_rx) = crossbeam_channel::bounded(PRICE_CHANNEL_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (storage_tx, storage_rx) = mpsc::channel(STORAGE_CHANNEL_CAPACITY);

    match history.load_from_store(Utc::now()) {
        Ok(0) => debug!("No cached price history"),
        Ok(n) => info!("Restored {n} cached price samples"),
        Err(e) => warn!("Price cache not restored: {e}"),
    }

    let system = &config.system;
    let tasks = vec![
        spawn_telemetry_poller(
            inverter.clone(),
            Duration::from_secs(system.telemetry_poll_secs.max(1)),
            telemetry_tx,
            shutdown_rx.clone(),
        ),
        spawn_price_poller(
            prices,
            history.clone(),
            Duration::from_secs(system.price_poll_secs.max(1)),
            price_tx,
            shutdown_rx.clone(),
        ),
        spawn_command_writer(inverter, command_rx),
        spawn_storage_writer(storage, storage_rx),
        tokio::spawn(
            DecisionLoop::new(config, history, telemetry_rx, price_rx, command_tx, storage_tx)
                .run(
                    Duration::from_secs(system.decision_interval_secs.max(1)),
                    shutdown_rx,
                ),
        ),
    ];

    if system.dry_run {
        info!("🔍 Dry run enabled: decisions are logged, no commands are sent");
    }

    RuntimeHandle { shutdown_tx, tasks }
}
