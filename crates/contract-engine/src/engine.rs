use crate::config::EngineConfig;
use crate::contract::{compound_profit, Contract, ContractStatus, ContractView, StartParams, TickVerdict};
use crate::events::{ContractEvent, TickOutcome};
use crate::metrics::EngineMetrics;
use crate::{EngineError, Result};
use chrono::Utc;
use ledger::{AccountLedger, CloseReason, TradeHistoryStore, TradeRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct EngineState {
    active: Option<Contract>,
    last_closed: Option<TradeRecord>,
}

/// Drives a single accumulator position: opening against the ledger,
/// applying ticks, and settling exactly once when the contract closes.
///
/// All transitions happen under one lock, so a user stop racing a closing
/// tick settles only once.
pub struct AccumulatorEngine {
    config: EngineConfig,
    ledger: Arc<AccountLedger>,
    history: Arc<TradeHistoryStore>,
    state: Mutex<EngineState>,
    metrics: EngineMetrics,
    event_tx: mpsc::UnboundedSender<ContractEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ContractEvent>>>,
}

impl AccumulatorEngine {
    pub fn new(config: EngineConfig, ledger: Arc<AccountLedger>, history: Arc<TradeHistoryStore>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            ledger,
            history,
            state: Mutex::new(EngineState::default()),
            metrics: EngineMetrics::new(),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn ledger(&self) -> &Arc<AccountLedger> {
        &self.ledger
    }

    #[inline]
    pub fn history(&self) -> &Arc<TradeHistoryStore> {
        &self.history
    }

    #[inline]
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Hands out the event stream. Only the first caller gets it.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ContractEvent>> {
        self.event_rx.lock().take()
    }

    /// Opens a contract at `entry_spot`, debiting the stake up front.
    pub fn start(&self, params: StartParams, entry_spot: f64) -> Result<ContractView> {
        params.validate(entry_spot)?;
        let ceiling = params.stake + compound_profit(params.stake, params.growth_rate, self.config.max_ticks);
        if !ceiling.is_finite() {
            return Err(EngineError::InvalidParameters(format!(
                "stake {} cannot be settled over {} ticks",
                params.stake, self.config.max_ticks
            )));
        }

        let mut state = self.state.lock();
        if let Some(active) = &state.active {
            warn!("Rejected start on {}: contract {} still active", params.market, active.id);
            return Err(EngineError::ContractAlreadyActive(active.id));
        }

        let mut contract = Contract::pending(params, entry_spot);
        self.ledger.debit_for(contract.id, contract.stake)?;
        contract.activate()?;

        let view = contract.view();
        info!(
            "Opened contract {} on {}: stake {:.2} at {} growth, entry {}",
            contract.id, contract.market, contract.stake, contract.growth_rate, entry_spot
        );
        self.metrics.record_opened(contract.stake);
        state.active = Some(contract);
        drop(state);

        self.emit(ContractEvent::Opened {
            contract: view.clone(),
            timestamp: Utc::now(),
        });
        Ok(view)
    }

    pub fn on_tick(&self, price: f64) -> TickOutcome {
        self.apply_tick(None, price)
    }

    /// Like [`on_tick`](Self::on_tick), but ignores the price unless
    /// `contract_id` is still the active contract.
    pub fn on_tick_for(&self, contract_id: Uuid, price: f64) -> TickOutcome {
        self.apply_tick(Some(contract_id), price)
    }

    fn apply_tick(&self, expected: Option<Uuid>, price: f64) -> TickOutcome {
        let mut state = self.state.lock();
        let Some(contract) = state
            .active
            .as_mut()
            .filter(|c| expected.map_or(true, |id| c.id == id))
        else {
            debug!("Tick {} ignored, no matching active contract", price);
            return TickOutcome::Ignored;
        };

        if !price.is_finite() || price < 0.0 {
            warn!("Rejected malformed price {} for contract {}", price, contract.id);
            self.metrics.record_tick_rejected();
            return TickOutcome::Rejected { price };
        }

        match contract.apply_price(price, &self.config) {
            TickVerdict::Accepted => {
                let view = self.record_accepted(contract, price);
                drop(state);

                let outcome = TickOutcome::Accepted {
                    tick_count: view.tick_count,
                    current_profit: view.current_profit,
                };
                self.emit_ticked(view, price);
                outcome
            }
            TickVerdict::Won(reason) => {
                // the winning tick is itself accepted; observers see it before the close
                let view = self.record_accepted(contract, price);
                self.emit_ticked(view, price);
                self.close_locked(&mut state, reason)
            }
            TickVerdict::Breached => {
                info!(
                    "Contract {} breached at {} ({:.4}% move)",
                    contract.id,
                    price,
                    contract.price_change(price) * 100.0
                );
                self.close_locked(&mut state, CloseReason::Breach)
            }
        }
    }

    /// Cancels the active contract and pays out stake plus accrued profit.
    pub fn stop(&self) -> Result<TradeRecord> {
        let mut state = self.state.lock();
        if state.active.is_none() {
            return Err(EngineError::InvalidStateTransition {
                from: None,
                to: ContractStatus::Cancelled,
            });
        }

        match self.close_locked(&mut state, CloseReason::UserStop) {
            TickOutcome::Closed(record) => Ok(record),
            _ => Err(EngineError::InvalidStateTransition {
                from: None,
                to: ContractStatus::Cancelled,
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn view(&self) -> Option<ContractView> {
        self.state.lock().active.as_ref().map(Contract::view)
    }

    pub fn last_closed(&self) -> Option<TradeRecord> {
        self.state.lock().last_closed.clone()
    }

    fn close_locked(&self, state: &mut EngineState, reason: CloseReason) -> TickOutcome {
        let Some(contract) = state.active.take() else {
            return TickOutcome::Ignored;
        };

        let record = match contract.close(reason) {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to close contract: {}", e);
                return TickOutcome::Ignored;
            }
        };

        let balance = match self.ledger.credit_for(record.contract_id, record.payout) {
            Ok(balance) => balance,
            Err(e) => {
                error!("Settlement credit for {} failed: {}", record.contract_id, e);
                self.ledger.balance()
            }
        };

        info!(
            "Closed contract {} as {:?} ({:?}) after {} ticks: profit {:.2}, payout {:.2}, balance {:.2}",
            record.contract_id, record.outcome, record.reason, record.tick_count, record.profit, record.payout, balance
        );
        self.metrics.record_closed(record.outcome, record.tick_count);
        self.history.append(record.clone());
        state.last_closed = Some(record.clone());

        self.emit(ContractEvent::Closed {
            record: record.clone(),
            balance,
            timestamp: Utc::now(),
        });
        TickOutcome::Closed(record)
    }

    fn record_accepted(&self, contract: &Contract, price: f64) -> ContractView {
        let view = contract.view();
        self.metrics.record_tick_accepted(view.current_profit);
        debug!(
            "Contract {} tick {}: price {}, profit {:.2}",
            view.id, view.tick_count, price, view.current_profit
        );
        view
    }

    fn emit_ticked(&self, contract: ContractView, price: f64) {
        self.emit(ContractEvent::Ticked {
            contract,
            price,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: ContractEvent) {
        // a dropped receiver just means nobody is listening
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::GrowthRate;
    use ledger::TradeOutcome;
    use market_data::Market;

    fn engine_with_balance(balance: f64) -> AccumulatorEngine {
        AccumulatorEngine::new(
            EngineConfig::default(),
            Arc::new(AccountLedger::new(balance).unwrap()),
            Arc::new(TradeHistoryStore::new()),
        )
    }

    fn params(stake: f64, rate: u8) -> StartParams {
        StartParams::new(Market::V25, stake, GrowthRate::new(rate).unwrap())
    }

    /// Feeds prices that each move by `step` relative to the previous one.
    fn drift(engine: &AccumulatorEngine, start: f64, step: f64, n: usize) -> Vec<TickOutcome> {
        let mut price = start;
        (0..n)
            .map(|_| {
                price *= 1.0 + step;
                engine.on_tick(price)
            })
            .collect()
    }

    #[test]
    fn test_breach_on_third_tick_forfeits_stake() {
        let engine = engine_with_balance(1000.0);
        engine.start(params(100.0, 5), 1000.0).unwrap();
        assert_eq!(engine.ledger().balance(), 900.0);

        assert!(matches!(engine.on_tick(1001.0), TickOutcome::Accepted { tick_count: 1, .. }));
        assert!(matches!(engine.on_tick(1002.0), TickOutcome::Accepted { tick_count: 2, .. }));
        let TickOutcome::Closed(record) = engine.on_tick(1012.0) else {
            panic!("expected breach to close the contract");
        };

        assert_eq!(record.outcome, TradeOutcome::Lost);
        assert_eq!(record.reason, CloseReason::Breach);
        assert_eq!(record.profit, -100.0);
        assert_eq!(record.tick_run_history, vec![2]);
        assert_eq!(engine.ledger().balance(), 900.0);
        assert!(!engine.is_active());
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.last_closed(), Some(record));
    }

    #[test]
    fn test_max_ticks_closes_won() {
        let engine = engine_with_balance(1000.0);
        engine.start(params(100.0, 1), 1000.0).unwrap();

        let outcomes = drift(&engine, 1000.0, 0.0005, 45);
        assert!(outcomes[..44].iter().all(|o| matches!(o, TickOutcome::Accepted { .. })));
        let TickOutcome::Closed(record) = &outcomes[44] else {
            panic!("expected close at tick 45");
        };

        assert_eq!(record.reason, CloseReason::MaxTicks);
        assert_eq!(record.tick_count, 45);
        assert!((record.profit - 56.4811).abs() < 1e-3);
        assert!((record.payout - 156.4811).abs() < 1e-3);
        assert!((engine.ledger().balance() - 1056.4811).abs() < 1e-3);
        assert_eq!(engine.on_tick(1100.0), TickOutcome::Ignored);
    }

    #[test]
    fn test_take_profit_closes_on_first_tick_reaching_target() {
        let engine = engine_with_balance(1000.0);
        engine.start(params(100.0, 5).with_take_profit(50.0), 1000.0).unwrap();

        let outcomes = drift(&engine, 1000.0, 0.001, 9);
        assert!(matches!(outcomes[7], TickOutcome::Accepted { tick_count: 8, .. }));
        let TickOutcome::Closed(record) = &outcomes[8] else {
            panic!("expected take profit at tick 9");
        };
        assert_eq!(record.reason, CloseReason::TakeProfit);
        assert_eq!(record.outcome, TradeOutcome::Won);
        assert!((record.profit - 55.1328).abs() < 1e-3);
    }

    #[test]
    fn test_winning_tick_is_counted_and_reported() {
        let engine = engine_with_balance(1000.0);
        let mut events = engine.take_event_receiver().unwrap();
        engine.start(params(100.0, 5).with_take_profit(50.0), 1000.0).unwrap();
        drift(&engine, 1000.0, 0.001, 9);

        assert_eq!(engine.metrics().snapshot().ticks_accepted, 9);

        let mut ticked = Vec::new();
        let mut closed_after = None;
        while let Ok(event) = events.try_recv() {
            match event {
                ContractEvent::Ticked { contract, .. } => ticked.push(contract.tick_count),
                ContractEvent::Closed { record, .. } => closed_after = Some((ticked.len(), record.tick_count)),
                ContractEvent::Opened { .. } => {}
            }
        }
        assert_eq!(ticked, (1..=9).collect::<Vec<u32>>());
        assert_eq!(closed_after, Some((9, 9)));
    }

    #[test]
    fn test_stake_with_unrepresentable_payout_is_rejected() {
        let engine = engine_with_balance(f64::MAX);
        assert!(matches!(
            engine.start(params(f64::MAX / 2.0, 5), 1000.0),
            Err(EngineError::InvalidParameters(_))
        ));
        assert!(!engine.is_active());
        assert_eq!(engine.ledger().balance(), f64::MAX);
        assert!(engine.ledger().movements().is_empty());
    }

    #[test]
    fn test_max_payout_closes_won() {
        let engine = AccumulatorEngine::new(
            EngineConfig {
                max_payout: 20.0,
                ..EngineConfig::default()
            },
            Arc::new(AccountLedger::new(1000.0).unwrap()),
            Arc::new(TradeHistoryStore::new()),
        );
        engine.start(params(100.0, 5), 1000.0).unwrap();
        let outcomes = drift(&engine, 1000.0, 0.001, 4);
        let TickOutcome::Closed(record) = &outcomes[3] else {
            panic!("expected max payout close at tick 4");
        };
        assert_eq!(record.reason, CloseReason::MaxPayout);
    }

    #[test]
    fn test_user_stop_credits_stake_plus_profit() {
        let engine = engine_with_balance(1000.0);
        engine.start(params(100.0, 3), 1000.0).unwrap();
        drift(&engine, 1000.0, 0.001, 5);

        let view = engine.view().unwrap();
        assert_eq!(view.tick_count, 5);
        let expected_payout = view.potential_payout();

        let record = engine.stop().unwrap();
        assert_eq!(record.outcome, TradeOutcome::Cancelled);
        assert_eq!(record.reason, CloseReason::UserStop);
        assert!((record.payout - expected_payout).abs() < 1e-9);
        assert!((engine.ledger().balance() - (900.0 + expected_payout)).abs() < 1e-9);
        assert!(engine.view().is_none());
    }

    #[test]
    fn test_stop_without_contract_is_invalid_transition() {
        let engine = engine_with_balance(1000.0);
        assert!(matches!(
            engine.stop(),
            Err(EngineError::InvalidStateTransition { from: None, .. })
        ));
    }

    #[test]
    fn test_second_start_rejected_while_active() {
        let engine = engine_with_balance(1000.0);
        let first = engine.start(params(10.0, 1), 500.0).unwrap();
        assert_eq!(
            engine.start(params(10.0, 1), 500.0),
            Err(EngineError::ContractAlreadyActive(first.id))
        );
        assert_eq!(engine.ledger().balance(), 990.0);
    }

    #[test]
    fn test_insufficient_balance_leaves_no_contract() {
        let engine = engine_with_balance(50.0);
        assert_eq!(
            engine.start(params(100.0, 1), 500.0),
            Err(EngineError::InsufficientBalance {
                requested: 100.0,
                available: 50.0
            })
        );
        assert!(!engine.is_active());
        assert_eq!(engine.ledger().balance(), 50.0);
        assert!(engine.ledger().movements().is_empty());
    }

    #[test]
    fn test_invalid_parameters_rejected_before_debit() {
        let engine = engine_with_balance(1000.0);
        assert!(matches!(
            engine.start(params(-5.0, 1), 500.0),
            Err(EngineError::InvalidParameters(_))
        ));
        assert_eq!(engine.ledger().balance(), 1000.0);
    }

    #[test]
    fn test_malformed_ticks_are_rejected_without_state_change() {
        let engine = engine_with_balance(1000.0);
        assert_eq!(engine.on_tick(100.0), TickOutcome::Ignored);

        engine.start(params(10.0, 2), 100.0).unwrap();
        assert!(matches!(engine.on_tick(f64::NAN), TickOutcome::Rejected { .. }));
        assert!(matches!(engine.on_tick(-1.0), TickOutcome::Rejected { .. }));
        assert!(matches!(engine.on_tick(f64::INFINITY), TickOutcome::Rejected { .. }));

        let view = engine.view().unwrap();
        assert_eq!(view.tick_count, 0);
        assert_eq!(view.last_price, 100.0);
        assert_eq!(engine.metrics().snapshot().ticks_rejected, 3);
    }

    #[test]
    fn test_tick_for_other_contract_is_ignored() {
        let engine = engine_with_balance(1000.0);
        let first = engine.start(params(10.0, 1), 100.0).unwrap();
        engine.stop().unwrap();
        let second = engine.start(params(10.0, 1), 200.0).unwrap();

        assert_eq!(engine.on_tick_for(first.id, 100.0), TickOutcome::Ignored);
        assert_eq!(engine.view().unwrap().tick_count, 0);
        assert!(matches!(
            engine.on_tick_for(second.id, 200.0),
            TickOutcome::Accepted { tick_count: 1, .. }
        ));
    }

    #[test]
    fn test_unchanged_price_is_accepted() {
        let engine = engine_with_balance(1000.0);
        engine.start(params(10.0, 1), 100.0).unwrap();
        assert!(matches!(engine.on_tick(100.0), TickOutcome::Accepted { tick_count: 1, .. }));
    }

    #[test]
    fn test_event_stream_reports_lifecycle() {
        let engine = engine_with_balance(1000.0);
        let mut events = engine.take_event_receiver().unwrap();
        assert!(engine.take_event_receiver().is_none());

        engine.start(params(10.0, 1), 100.0).unwrap();
        engine.on_tick(100.01);
        engine.stop().unwrap();

        assert!(matches!(events.try_recv(), Ok(ContractEvent::Opened { .. })));
        assert!(matches!(events.try_recv(), Ok(ContractEvent::Ticked { .. })));
        match events.try_recv() {
            Ok(ContractEvent::Closed { record, balance, .. }) => {
                assert_eq!(record.outcome, TradeOutcome::Cancelled);
                assert_eq!(balance, engine.ledger().balance());
            }
            other => panic!("expected closed event, got {:?}", other),
        }
    }

    #[test]
    fn test_every_open_settles_exactly_once() {
        let engine = engine_with_balance(10_000.0);
        for i in 0..6 {
            engine.start(params(100.0, (i % 5 + 1) as u8), 1000.0).unwrap();
            drift(&engine, 1000.0, 0.0005, i);
            if engine.is_active() {
                if i % 2 == 0 {
                    engine.on_tick(2000.0);
                } else {
                    engine.stop().unwrap();
                }
            }
        }

        let movements = engine.ledger().movements();
        let debits = movements.iter().filter(|m| m.kind == ledger::MovementKind::Debit).count();
        let credits = movements.iter().filter(|m| m.kind == ledger::MovementKind::Credit).count();
        assert_eq!(debits, 6);
        assert_eq!(credits, 6);
        assert_eq!(engine.history().len(), 6);

        let expected: f64 = 10_000.0 + engine.history().records().iter().map(|r| r.payout - r.stake).sum::<f64>();
        assert!((engine.ledger().balance() - expected).abs() < 1e-6);
    }
}
