use accumulator_sim::config::{AppConfig, SourceKind};
use accumulator_sim::utils::{format_currency, format_duration, format_percent};
use accumulator_sim::{TickSource, TradingSession, VERSION};
use anyhow::Context;
use contract_engine::{analyze_durations, AnalysisParams, ContractEvent, StartParams};
use feed_client::{FeedEvent, PriceFeedClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

struct SimulatorApp {
    config: AppConfig,
    session: Arc<TradingSession>,
    feed: Option<PriceFeedClient>,
}

impl SimulatorApp {
    fn new(config: AppConfig) -> anyhow::Result<Self> {
        info!("Initializing accumulator simulator components...");

        let session = Arc::new(TradingSession::from_config(&config)?);
        let feed = match config.session.source {
            SourceKind::Live => Some(PriceFeedClient::new(config.feed.clone()).context("Failed to create feed client")?),
            SourceKind::Simulated => None,
        };

        Ok(Self { config, session, feed })
    }

    fn setup_event_handlers(&self) {
        if let Some(mut events) = self.session.engine().take_event_receiver() {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        ContractEvent::Opened { contract, .. } => {
                            info!(
                                "Contract opened: {} {} stake {} at {}",
                                contract.id,
                                contract.market.label(),
                                format_currency(contract.stake),
                                contract.growth_rate
                            );
                        }
                        ContractEvent::Ticked { contract, price, .. } => {
                            debug!(
                                "Tick {} @ {}: profit {}, payout {}",
                                contract.tick_count,
                                price,
                                format_currency(contract.current_profit),
                                format_currency(contract.potential_payout())
                            );
                        }
                        ContractEvent::Closed { record, balance, .. } => {
                            info!(
                                "Contract closed: {:?} via {:?} after {} ticks in {}, profit {}, balance {}",
                                record.outcome,
                                record.reason,
                                record.tick_count,
                                format_duration(record.duration().to_std().unwrap_or_default()),
                                format_currency(record.profit),
                                format_currency(balance)
                            );
                        }
                    }
                }
            });
        }

        if let Some(mut events) = self.feed.as_ref().and_then(|feed| feed.take_event_receiver()) {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        FeedEvent::Connected { url } => info!("Feed connected: {}", url),
                        FeedEvent::Disconnected => warn!("Feed disconnected"),
                        FeedEvent::Error(message) => error!("Feed error: {}", message),
                    }
                }
            });
        }

        info!("Event handlers configured");
    }

    fn run_duration_analysis(&self) -> anyhow::Result<()> {
        let session = &self.config.session;
        let params = AnalysisParams {
            trials: session.analysis_trials,
            max_ticks: self.config.engine.max_ticks,
            seed: self.config.simulator.seed,
            ..AnalysisParams::new(session.market, session.growth_rate, session.stake)
        };

        let analysis = analyze_durations(&params)?;
        info!(
            "Duration analysis for {} at {}: optimal {} ticks, average profit {}, best win probability {}",
            session.market.label(),
            session.growth_rate,
            analysis.optimal_duration,
            format_currency(analysis.max_average_profit),
            format_percent(analysis.max_win_probability)
        );
        Ok(())
    }

    async fn run_trade(&self) -> anyhow::Result<()> {
        let session = &self.config.session;
        let mut params = StartParams::new(session.market, session.stake, session.growth_rate);
        params.take_profit = session.take_profit;

        match &self.feed {
            Some(feed) => {
                self.session.start_live_trade(feed, params).await?;
            }
            None => {
                let source = TickSource::simulated(session.market, &self.config.simulator)?;
                self.session.start_trade(params, self.config.simulator.initial_price, source)?;
            }
        }

        tokio::select! {
            record = self.session.wait_for_close() => {
                if record.is_none() {
                    warn!("Price source ended before the contract closed, cancelling");
                    self.session.stop_trade().await?;
                }
            }
            result = signal::ctrl_c() => {
                result?;
                info!("Interrupted, cancelling open contract");
                self.session.stop_trade().await?;
                anyhow::bail!("interrupted");
            }
        }
        Ok(())
    }

    async fn run_demo_trading(&self) -> anyhow::Result<()> {
        info!("Starting demo trading, {} contracts...", self.config.session.trades);

        for round in 1..=self.config.session.trades {
            if self.session.ledger().balance() < self.config.session.stake {
                warn!("Balance too low for another contract, stopping after {} rounds", round - 1);
                break;
            }
            if let Err(e) = self.run_trade().await {
                error!("Round {} aborted: {:#}", round, e);
                break;
            }
        }

        info!("Demo trading completed");
        Ok(())
    }

    fn print_summary(&self) -> anyhow::Result<()> {
        let summary = self.session.history().summary();
        info!("=== Session Summary ===");
        info!(
            "{} contracts: {} won, {} lost, {} cancelled ({} win rate)",
            summary.total,
            summary.won,
            summary.lost,
            summary.cancelled,
            format_percent(summary.win_rate)
        );
        info!(
            "Staked {}, net profit {}, balance {}",
            format_currency(summary.total_staked),
            format_currency(summary.net_profit),
            format_currency(self.session.ledger().balance())
        );
        let metrics = self.session.engine().metrics().snapshot();
        info!("Ticks accepted {}, rejected {}", metrics.ticks_accepted, metrics.ticks_rejected);
        debug!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(feed) = &self.feed {
            feed.close().await;
        }
        info!("Accumulator simulator shutdown complete");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting accumulator simulator v{}", VERSION);

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    let app = SimulatorApp::new(config)?;
    app.setup_event_handlers();
    app.run_duration_analysis()?;
    app.run_demo_trading().await?;
    app.print_summary()?;
    app.shutdown().await;

    Ok(())
}
