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

//! Decision loop wiring with in-memory collaborators

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use gridsage_core::{
    DecisionLoop, DecisionStorage, InverterDataSource, PriceHistoryManager, PriceSource,
    StorageItem, TelemetryUpdate, start_runtime,
};
use gridsage_types::{
    BatterySnapshot, CommandKind, DecisionRecord, InverterCommand, PowerFlowSnapshot, PriceSample,
    PriceUpdate, PvOutlook, SessionRecord, SystemConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

fn flat_prices(price: f32) -> PriceUpdate {
    let now = Utc::now();
    PriceUpdate {
        current: Some(PriceSample::new(now, price)),
        forecast: (0..24)
            .map(|h| PriceSample::new(now + Duration::hours(h), price))
            .collect(),
        ..PriceUpdate::default()
    }
}

fn telemetry(soc: f32) -> TelemetryUpdate {
    TelemetryUpdate {
        battery: BatterySnapshot::new(soc, Utc::now()),
        power: PowerFlowSnapshot::default(),
        pv_outlook: PvOutlook::default(),
    }
}

struct Harness {
    telemetry_tx: crossbeam_channel::Sender<TelemetryUpdate>,
    price_tx: crossbeam_channel::Sender<PriceUpdate>,
    command_rx: mpsc::Receiver<InverterCommand>,
    storage_rx: mpsc::Receiver<StorageItem>,
    decision_loop: DecisionLoop,
}

fn harness(config: &SystemConfig) -> Harness {
    let (telemetry_tx, telemetry_rx) = crossbeam_channel::bounded(10);
    let (price_tx, price_rx) = crossbeam_channel::bounded(10);
    let (command_tx, command_rx) = mpsc::channel(16);
    let (storage_tx, storage_rx) = mpsc::channel(16);
    let history = Arc::new(PriceHistoryManager::new(&config.price_history));
    Harness {
        telemetry_tx,
        price_tx,
        command_rx,
        storage_rx,
        decision_loop: DecisionLoop::new(
            config,
            history,
            telemetry_rx,
            price_rx,
            command_tx,
            storage_tx,
        ),
    }
}

#[test]
fn test_tick_without_data_is_noop() {
    let mut h = harness(&SystemConfig::default());
    assert!(h.decision_loop.tick(Utc::now()).is_none());

    h.telemetry_tx.send(telemetry(30.0)).unwrap();
    assert!(h.decision_loop.tick(Utc::now()).is_none());
    assert!(h.command_rx.try_recv().is_err());
    assert!(h.storage_rx.try_recv().is_err());
}

#[test]
fn test_tick_sends_commands_and_records() {
    let mut h = harness(&SystemConfig::default());
    // Only the newest value of each channel is used
    h.telemetry_tx.send(telemetry(80.0)).unwrap();
    h.telemetry_tx.send(telemetry(30.0)).unwrap();
    h.price_tx.send(flat_prices(0.40)).unwrap();

    let outcome = h.decision_loop.tick(Utc::now()).expect("cycle ran");
    assert!(outcome.decision.should_act);

    let command = h.command_rx.try_recv().unwrap();
    assert_eq!(command.kind, CommandKind::StartCharge);
    match h.storage_rx.try_recv().unwrap() {
        StorageItem::Decision(record) => assert_eq!(record.soc, 30.0),
        StorageItem::Session(_) => panic!("expected a decision record"),
    }
    assert_eq!(h.decision_loop.state().charging.daily_session_count, 1);

    // Same data next tick: session continues, no new command
    h.decision_loop.tick(Utc::now()).unwrap();
    assert!(h.command_rx.try_recv().is_err());
}

#[test]
fn test_dry_run_sends_no_commands() {
    let mut config = SystemConfig::default();
    config.system.dry_run = true;
    let mut h = harness(&config);
    h.telemetry_tx.send(telemetry(30.0)).unwrap();
    h.price_tx.send(flat_prices(0.40)).unwrap();

    h.decision_loop.tick(Utc::now()).unwrap();
    assert!(h.command_rx.try_recv().is_err());
    assert!(h.storage_rx.try_recv().is_ok());
}

#[derive(Default)]
struct MockInverter {
    commands: Mutex<Vec<InverterCommand>>,
}

#[async_trait]
impl InverterDataSource for MockInverter {
    async fn read_battery(&self) -> Result<BatterySnapshot> {
        Ok(BatterySnapshot::new(30.0, Utc::now()))
    }

    async fn read_power_flow(&self) -> Result<PowerFlowSnapshot> {
        Ok(PowerFlowSnapshot::default())
    }

    async fn send_command(&self, command: &InverterCommand) -> Result<()> {
        self.commands.lock().push(command.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock-inverter"
    }
}

struct MockPrices;

#[async_trait]
impl PriceSource for MockPrices {
    async fn fetch_prices(&self) -> Result<PriceUpdate> {
        Ok(flat_prices(0.40))
    }

    fn name(&self) -> &str {
        "mock-prices"
    }
}

#[derive(Default)]
struct MockStorage {
    decisions: Mutex<Vec<DecisionRecord>>,
}

#[async_trait]
impl DecisionStorage for MockStorage {
    async fn store_decision(&self, record: &DecisionRecord) -> Result<()> {
        self.decisions.lock().push(record.clone());
        Ok(())
    }

    async fn store_session(&self, _record: &SessionRecord) -> Result<()> {
        bail!("sessions not stored in this test")
    }
}

#[tokio::test]
async fn test_runtime_end_to_end() {
    let mut config = SystemConfig::default();
    config.system.decision_interval_secs = 1;
    config.system.telemetry_poll_secs = 1;
    config.system.price_poll_secs = 1;

    let inverter = Arc::new(MockInverter::default());
    let storage = Arc::new(MockStorage::default());
    let history = Arc::new(PriceHistoryManager::new(&config.price_history));

    let handle = start_runtime(
        &config,
        history.clone(),
        inverter.clone(),
        Arc::new(MockPrices),
        storage.clone(),
    );

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while storage.decisions.lock().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    handle.shutdown().await;

    assert!(!storage.decisions.lock().is_empty());
    assert!(
        inverter
            .commands
            .lock()
            .iter()
            .any(|c| c.kind == CommandKind::StartCharge)
    );
    assert!(!history.is_empty());
}
