//! Drives one accumulator contract at a time from a price source.

use crate::config::{AppConfig, SimulatorConfig};
use anyhow::{Context, Result};
use contract_engine::{AccumulatorEngine, ContractView, EngineConfig, StartParams, TickOutcome};
use feed_client::{PriceFeedClient, Subscription};
use ledger::{AccountLedger, TradeHistoryStore, TradeRecord};
use market_data::{Market, PriceSimulator};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where the running contract gets its prices from.
#[derive(Debug)]
pub enum TickSource {
    /// One simulated price per cadence interval.
    Simulated(PriceSimulator),
    /// One price per feed tick.
    Live(Subscription),
    /// Prices pushed by the caller.
    Manual(mpsc::UnboundedReceiver<f64>),
}

impl TickSource {
    pub fn simulated(market: Market, config: &SimulatorConfig) -> Result<Self> {
        let volatility = config.volatility_for(market);
        let simulator = match config.seed {
            Some(seed) => PriceSimulator::with_seed(config.initial_price, volatility, config.trend, seed),
            None => PriceSimulator::new(config.initial_price, volatility, config.trend),
        }
        .with_context(|| format!("Failed to create price simulator for {}", market))?;
        Ok(TickSource::Simulated(simulator))
    }

    pub fn manual() -> (mpsc::UnboundedSender<f64>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, TickSource::Manual(rx))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TickSource::Simulated(_) => "simulated",
            TickSource::Live(_) => "live",
            TickSource::Manual(_) => "manual",
        }
    }

    /// `None` once the source can produce no more prices.
    async fn next_price(&mut self, cadence: &mut Interval) -> Option<f64> {
        match self {
            TickSource::Simulated(simulator) => {
                cadence.tick().await;
                Some(simulator.next_price())
            }
            TickSource::Live(subscription) => subscription.recv().await.map(|tick| tick.quote),
            TickSource::Manual(prices) => prices.recv().await,
        }
    }

    /// Ends the source once its contract closed on its own. A live
    /// subscription is released and the acknowledgement awaited.
    async fn release(self) {
        if let TickSource::Live(subscription) = self {
            let id = subscription.id().to_string();
            if let Err(e) = subscription.unsubscribe().await {
                warn!("Failed to release feed subscription {}: {}", id, e);
            }
        }
    }
}

#[derive(Debug, Clone)]
enum DriverState {
    Running,
    /// `None` when the source dried up before the contract closed.
    Finished(Option<TradeRecord>),
}

/// The tick task feeding the open contract. Its handle stays here for the
/// task's whole life so stop and start can always abort it.
struct Driver {
    task: JoinHandle<()>,
    state: watch::Receiver<DriverState>,
}

/// Owns the ledger, history and engine, and the task that feeds ticks into
/// the engine while a contract is open.
pub struct TradingSession {
    engine: Arc<AccumulatorEngine>,
    driver: Mutex<Option<Driver>>,
}

impl TradingSession {
    pub fn new(engine_config: EngineConfig, ledger: Arc<AccountLedger>, history: Arc<TradeHistoryStore>) -> Self {
        Self {
            engine: Arc::new(AccumulatorEngine::new(engine_config, ledger, history)),
            driver: Mutex::new(None),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let ledger = AccountLedger::new(config.ledger.initial_balance).context("Failed to open account ledger")?;
        Ok(Self::new(
            config.engine.clone(),
            Arc::new(ledger),
            Arc::new(TradeHistoryStore::new()),
        ))
    }

    #[inline]
    pub fn engine(&self) -> &Arc<AccumulatorEngine> {
        &self.engine
    }

    #[inline]
    pub fn ledger(&self) -> &Arc<AccountLedger> {
        self.engine.ledger()
    }

    #[inline]
    pub fn history(&self) -> &Arc<TradeHistoryStore> {
        self.engine.history()
    }

    pub fn is_running(&self) -> bool {
        self.driver
            .lock()
            .as_ref()
            .is_some_and(|driver| matches!(*driver.state.borrow(), DriverState::Running))
    }

    /// Opens a contract at `entry_spot` and starts feeding it from `source`.
    pub fn start_trade(
        &self,
        params: StartParams,
        entry_spot: f64,
        source: TickSource,
    ) -> contract_engine::Result<ContractView> {
        let mut driver = self.driver.lock();
        let view = self.engine.start(params, entry_spot)?;

        if let Some(stale) = driver.take() {
            stale.task.abort();
        }

        info!("Driving contract {} from {} source", view.id, source.kind());
        let (state_tx, state_rx) = watch::channel(DriverState::Running);
        let task = tokio::spawn(drive(Arc::clone(&self.engine), view.id, source, state_tx));
        *driver = Some(Driver { task, state: state_rx });
        Ok(view)
    }

    /// Starts a contract on the live feed, entering at the first tick received.
    pub async fn start_live_trade(&self, client: &PriceFeedClient, params: StartParams) -> Result<ContractView> {
        let symbol = params.market.feed_symbol();
        let mut subscription = client
            .subscribe(symbol)
            .await
            .with_context(|| format!("Failed to subscribe to {}", symbol))?;

        let entry = subscription
            .recv()
            .await
            .with_context(|| format!("Feed closed before the first {} tick", symbol))?;

        debug!("Entering {} at {}", symbol, entry.quote);
        let view = self.start_trade(params, entry.quote, TickSource::Live(subscription))?;
        Ok(view)
    }

    /// Cancels the running contract. The tick task is stopped first, so no
    /// tick reaches the engine once this returns.
    pub async fn stop_trade(&self) -> contract_engine::Result<TradeRecord> {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.task.abort();
            let _ = driver.task.await;
        }
        self.engine.stop()
    }

    /// Waits for the running contract to close on its own. `None` when no
    /// contract is running, the source dried up first, or the trade was
    /// stopped meanwhile.
    ///
    /// Cancelling the returned future leaves the tick task running and
    /// stoppable through [`stop_trade`](Self::stop_trade).
    pub async fn wait_for_close(&self) -> Option<TradeRecord> {
        let mut state = self.driver.lock().as_ref().map(|driver| driver.state.clone())?;
        let finished = match state.wait_for(|s| matches!(s, DriverState::Finished(_))).await {
            Ok(current) => match &*current {
                DriverState::Finished(record) => record.clone(),
                DriverState::Running => None,
            },
            Err(_) => {
                debug!("Tick task ended without a close");
                None
            }
        };
        finished
    }
}

async fn drive(
    engine: Arc<AccumulatorEngine>,
    contract_id: Uuid,
    mut source: TickSource,
    state: watch::Sender<DriverState>,
) {
    let mut cadence = interval(Duration::from_millis(engine.config().tick_interval_ms));
    cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick of an interval completes immediately
    cadence.tick().await;

    let record = loop {
        let Some(price) = source.next_price(&mut cadence).await else {
            warn!("{} price source ended while a contract was open", source.kind());
            state.send_replace(DriverState::Finished(None));
            return;
        };

        match engine.on_tick_for(contract_id, price) {
            TickOutcome::Closed(record) => break Some(record),
            TickOutcome::Ignored => break engine.last_closed().filter(|r| r.contract_id == contract_id),
            TickOutcome::Accepted { .. } | TickOutcome::Rejected { .. } => {}
        }
    };

    state.send_replace(DriverState::Finished(record));
    source.release().await;
}

impl Drop for TradingSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.task.abort();
        }
    }
}
