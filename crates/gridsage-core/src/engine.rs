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

//! One decision cycle: thresholds, charging, selling, arbitration and commands.
//!
//! `evaluate` is a pure read of [`EngineState`]; `prepare` and `commit` are the only
//! places that mutate it.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use gridsage_types::{
    ActionKind, AdaptiveThresholds, BatterySnapshot, ChargeDecision, ChargingTier, Decision,
    DecisionReason, DecisionRecord, InverterCommand, PowerFlowSnapshot, PriceStatistics,
    PriceUpdate, PvOutlook, SellDecision, SessionRecord, SessionTransition, SystemConfig,
};
use tracing::{debug, info};

use crate::charging::{ChargingDecisionEngine, ChargingInputs};
use crate::pricing::PriceHistoryManager;
use crate::selling::{SellingDecisionEngine, SellingInputs, SellingScheduler};
use crate::spike::PriceSpikeDetector;
use crate::state::EngineState;
use crate::thresholds::AdaptiveThresholdCalculator;

/// Latest telemetry and prices for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleInputs {
    pub now: DateTime<Utc>,
    pub battery: BatterySnapshot,
    pub power: PowerFlowSnapshot,
    pub prices: PriceUpdate,
    pub pv_outlook: PvOutlook,
}

/// Result of [`DecisionEngine::run_cycle`]
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub decision: Decision,
    pub record: DecisionRecord,

    /// Sessions closed during this cycle
    pub sessions: Vec<SessionRecord>,
}

/// Values derived from history once per cycle
#[derive(Debug, Clone)]
struct CycleContext {
    price: f32,
    stats: PriceStatistics,
    thresholds: AdaptiveThresholds,
    min_sell_price: f32,
}

/// Orchestrates every component for a decision cycle
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: SystemConfig,
    tz: Tz,
    thresholds: AdaptiveThresholdCalculator,
    charging: ChargingDecisionEngine,
    selling: SellingDecisionEngine,
    scheduler: SellingScheduler,
}

impl DecisionEngine {
    pub fn new(config: &SystemConfig) -> Self {
        let tz = config.tz();
        Self {
            config: config.clone(),
            tz,
            thresholds: AdaptiveThresholdCalculator::new(&config.thresholds, tz),
            charging: ChargingDecisionEngine::new(config),
            selling: SellingDecisionEngine::new(config),
            scheduler: SellingScheduler::new(config),
        }
    }

    /// Fresh state for process start
    pub fn new_state(&self) -> EngineState {
        EngineState::new(PriceSpikeDetector::new(&self.config.spike, self.tz))
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn charging(&self) -> &ChargingDecisionEngine {
        &self.charging
    }

    pub fn selling(&self) -> &SellingDecisionEngine {
        &self.selling
    }

    pub fn scheduler(&self) -> &SellingScheduler {
        &self.scheduler
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Per-cycle state updates that precede evaluation: local-midnight resets, feeding the live
    /// price to the spike detector and refreshing the sell plan.
    pub fn prepare(&self, state: &mut EngineState, inputs: &CycleInputs) {
        let now = inputs.now;
        state.roll_over(now, self.local_date(now));

        if let Some(current) = inputs.prices.current
            && let Some(spike) = state.spike_detector.detect_spike_at(current.price, now)
        {
            debug!("Spike this cycle: {}", spike);
        }

        let forecast = &inputs.prices.forecast;
        if !state.selling.is_active()
            && self
                .scheduler
                .needs_regeneration(state.selling.plan_basis.as_ref(), forecast, now)
        {
            let plan = self
                .scheduler
                .generate_plan(forecast, inputs.battery.soc(), now);
            // Peaks left but nothing to sell yet: try again once the battery has charged
            let settled = plan.is_some() || !self.scheduler.has_sellable_peaks(forecast, now);
            state.selling.plan = plan;
            state.selling.plan_basis = if settled {
                Some(self.scheduler.basis_for(forecast, now))
            } else {
                debug!(
                    "Sell plan deferred at {:.1}% SOC, retrying next cycle",
                    inputs.battery.soc()
                );
                None
            };
        }
    }

    fn context(&self, history: &PriceHistoryManager, inputs: &CycleInputs) -> Option<CycleContext> {
        let price = inputs.prices.current?.price;
        let stats = history.calculate_statistics_at(inputs.now);
        let thresholds = self.thresholds.calculate(&stats, inputs.now);
        let min_sell_price = self.selling.dynamic_min_sell_price(history, inputs.now);
        Some(CycleContext {
            price,
            stats,
            thresholds,
            min_sell_price,
        })
    }

    fn charging_inputs<'a>(
        inputs: &'a CycleInputs,
        ctx: &'a CycleContext,
    ) -> ChargingInputs<'a> {
        ChargingInputs {
            now: inputs.now,
            battery: &inputs.battery,
            power: &inputs.power,
            price: ctx.price,
            thresholds: &ctx.thresholds,
            stats: &ctx.stats,
            forecast: &inputs.prices.forecast,
            tariff: inputs.prices.tariff,
            pv_outlook: inputs.pv_outlook,
        }
    }

    fn selling_inputs<'a>(
        &self,
        state: &'a EngineState,
        inputs: &'a CycleInputs,
        ctx: &CycleContext,
    ) -> SellingInputs<'a> {
        SellingInputs {
            now: inputs.now,
            battery: &inputs.battery,
            power: &inputs.power,
            price: ctx.price,
            min_sell_price: ctx.min_sell_price,
            active_spike: state
                .spike_detector
                .active_spike(inputs.now, self.config.spike.active_max_age_minutes),
        }
    }

    /// Decide for this cycle. Pure: the same state and inputs give the same decision.
    pub fn evaluate(
        &self,
        state: &EngineState,
        history: &PriceHistoryManager,
        inputs: &CycleInputs,
    ) -> Decision {
        match self.context(history, inputs) {
            Some(ctx) => self.evaluate_with(state, inputs, &ctx),
            None => no_price_decision(inputs.now),
        }
    }

    fn evaluate_with(&self, state: &EngineState, inputs: &CycleInputs, ctx: &CycleContext) -> Decision {
        let charge = self
            .charging
            .evaluate(&state.charging, &Self::charging_inputs(inputs, ctx));
        let sell = self
            .selling
            .evaluate(&state.selling, &self.selling_inputs(state, inputs, ctx));
        self.arbitrate(inputs.now, charge, sell)
    }

    /// Pick one action out of the charge and sell decisions and map transitions to commands
    fn arbitrate(&self, now: DateTime<Utc>, mut charge: ChargeDecision, mut sell: SellDecision) -> Decision {
        let urgent_charge = charge.should_charge
            && matches!(
                charge.tier,
                Some(ChargingTier::Emergency | ChargingTier::Critical)
            );

        if urgent_charge && sell.should_sell {
            sell = SellDecision {
                transition: override_transition(sell.transition),
                ..SellDecision::hold(DecisionReason::ChargingPriority, sell.price)
            };
        } else if sell.should_sell && charge.should_charge {
            charge = ChargeDecision {
                transition: override_transition(charge.transition),
                ..ChargeDecision::idle(DecisionReason::SellingPriority, 1.0, charge.price)
            };
        }

        let (action, reason, confidence) = if charge.should_charge {
            (charge.action(), charge.reason.clone(), charge.confidence)
        } else if sell.should_sell {
            (ActionKind::Sell, sell.reason.clone(), sell.confidence)
        } else if sell.transition == SessionTransition::Stop {
            (ActionKind::Idle, sell.reason.clone(), sell.confidence)
        } else {
            (ActionKind::Idle, charge.reason.clone(), charge.confidence)
        };

        let commands = self.commands(&charge, &sell);

        Decision {
            timestamp: now,
            should_act: action != ActionKind::Idle,
            action,
            reason,
            confidence,
            charge,
            sell,
            commands,
        }
    }

    /// Stops first, then starts
    fn commands(&self, charge: &ChargeDecision, sell: &SellDecision) -> Vec<InverterCommand> {
        let mut commands = Vec::new();

        if charge.transition == SessionTransition::Stop {
            commands.push(InverterCommand::stop_charge());
        }
        if sell.transition == SessionTransition::Stop {
            commands.push(InverterCommand::stop_sell());
        }
        if charge.should_charge
            && charge.transition == SessionTransition::Start
            && let Some(target) = charge.target_soc
        {
            commands.push(InverterCommand::start_charge(
                self.config.battery.max_charge_rate_kw * 1000.0,
                target,
            ));
        }
        if sell.should_sell
            && sell.transition == SessionTransition::Start
            && let Some(target) = sell.target_soc
        {
            commands.push(InverterCommand::start_sell(sell.power_w, target));
        }

        commands
    }

    /// Apply the session transitions of `decision`. Returns the sessions it closed.
    pub fn commit(
        &self,
        state: &mut EngineState,
        history: &PriceHistoryManager,
        decision: &Decision,
        inputs: &CycleInputs,
    ) -> Vec<SessionRecord> {
        match self.context(history, inputs) {
            Some(ctx) => self.commit_with(state, decision, inputs, &ctx),
            None => Vec::new(),
        }
    }

    fn commit_with(
        &self,
        state: &mut EngineState,
        decision: &Decision,
        inputs: &CycleInputs,
        ctx: &CycleContext,
    ) -> Vec<SessionRecord> {
        let charge_inputs = Self::charging_inputs(inputs, ctx);
        let sell_inputs = SellingInputs {
            now: inputs.now,
            battery: &inputs.battery,
            power: &inputs.power,
            price: ctx.price,
            min_sell_price: ctx.min_sell_price,
            active_spike: None,
        };

        let mut sessions = Vec::new();
        // Sell stops before a charge starts so the inverter never does both
        sessions.extend(
            self.selling
                .commit(&mut state.selling, &decision.sell, &sell_inputs),
        );
        sessions.extend(
            self.charging
                .commit(&mut state.charging, &decision.charge, &charge_inputs),
        );
        sessions
    }

    /// prepare, evaluate and commit in one go
    pub fn run_cycle(
        &self,
        state: &mut EngineState,
        history: &PriceHistoryManager,
        inputs: &CycleInputs,
    ) -> CycleOutcome {
        self.prepare(state, inputs);

        let (decision, sessions) = match self.context(history, inputs) {
            Some(ctx) => {
                let decision = self.evaluate_with(state, inputs, &ctx);
                let sessions = self.commit_with(state, &decision, inputs, &ctx);
                (decision, sessions)
            }
            None => (no_price_decision(inputs.now), Vec::new()),
        };

        info!(
            "⚡ Decision {} at SOC {:.1}%: {} (confidence {:.2})",
            decision.action,
            inputs.battery.soc(),
            decision.reason,
            decision.confidence
        );
        for command in &decision.commands {
            debug!("Command: {}", command);
        }

        let record = DecisionRecord::from_decision(&decision, inputs.battery.soc());
        CycleOutcome {
            decision,
            record,
            sessions,
        }
    }
}

/// Start is cancelled, a running session is stopped
fn override_transition(transition: SessionTransition) -> SessionTransition {
    match transition {
        SessionTransition::Start | SessionTransition::None => SessionTransition::None,
        SessionTransition::Continue | SessionTransition::Resync | SessionTransition::Stop => {
            SessionTransition::Stop
        }
        SessionTransition::Drop => SessionTransition::Drop,
    }
}

fn no_price_decision(now: DateTime<Utc>) -> Decision {
    let reason = DecisionReason::InsufficientData {
        missing: "current price".to_owned(),
    };
    Decision {
        timestamp: now,
        should_act: false,
        action: ActionKind::Idle,
        reason: reason.clone(),
        confidence: 0.0,
        charge: ChargeDecision::idle(reason.clone(), 0.0, 0.0),
        sell: SellDecision::hold(reason, 0.0),
        commands: Vec::new(),
    }
}
