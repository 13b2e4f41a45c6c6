//! Wires the component graph and owns its lifecycle.
//!
//! Per symbol: one market-data feed, one lead coordinator with its agent
//! roster, one hot loop. Multi-symbol startup is staggered so the first
//! agent cycles do not burst the exchange's REST quota. Shutdown is
//! cooperative with a short drain timeout per task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agents::{AgentRole, IndependentAgent, LeadCoordinator};
use crate::config::AppConfig;
use crate::error::{QuorumError, Result};
use crate::exchange::{BitgetClient, ExchangeClient};
use crate::feed::MarketDataFeed;
use crate::llm::LlmClient;

use super::hot_loop::HotLoop;
use super::risk::RiskEngine;

const DRAIN_TIMEOUT_SECS: u64 = 2;

/// Default analyst roster spawned per symbol
const DEFAULT_ROSTER: [AgentRole; 4] = [
    AgentRole::Technical,
    AgentRole::Structure,
    AgentRole::Sentiment,
    AgentRole::Momentum,
];

struct SymbolRuntime {
    symbol: String,
    feed: Arc<MarketDataFeed>,
    coordinator: Arc<LeadCoordinator>,
}

/// Builds, starts, watches, and drains the per-symbol component triples
pub struct Supervisor {
    config: AppConfig,
    exchange: Arc<dyn ExchangeClient>,
    llm: Arc<LlmClient>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    runtimes: Vec<SymbolRuntime>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Validate config and build the shared clients. Any config problem
    /// is fatal here; the process must not trade on a bad setup.
    pub fn new(config: AppConfig) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(QuorumError::Validation(problems.join("; ")));
        }

        let exchange: Arc<dyn ExchangeClient> =
            Arc::new(BitgetClient::new(&config.exchange, config.dry_run)?);
        let llm = Arc::new(LlmClient::new(config.model.clone())?);

        Ok(Self::with_clients(config, exchange, llm))
    }

    /// Wire with externally built clients (tests inject mocks here)
    pub fn with_clients(
        config: AppConfig,
        exchange: Arc<dyn ExchangeClient>,
        llm: Arc<LlmClient>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            exchange,
            llm,
            shutdown_tx,
            shutdown_rx,
            runtimes: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Start every symbol triple, then heartbeat until ctrl-c
    pub async fn run(mut self) -> Result<()> {
        let symbols = self.config.symbols.clone();
        let stagger = Duration::from_secs(self.config.engine.stagger_secs);

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                info!(?stagger, "staggering next symbol startup");
                tokio::time::sleep(stagger).await;
            }
            self.start_symbol(symbol).await?;
        }

        info!(symbols = ?symbols, "all symbols started");
        self.watch_loop().await;
        self.shutdown().await;
        Ok(())
    }

    async fn start_symbol(&mut self, symbol: &str) -> Result<()> {
        info!(symbol, "starting symbol runtime");

        let feed = Arc::new(MarketDataFeed::new(symbol, &self.config.exchange.ws_url));
        self.handles.push(Arc::clone(&feed).start());

        let coordinator = Arc::new(LeadCoordinator::new(
            symbol,
            self.config.trading.clone(),
            Arc::clone(&self.llm),
            Duration::from_secs(self.config.engine.warmup_secs),
            Duration::from_secs(self.config.engine.coordinator_interval_secs),
        ));

        for role in DEFAULT_ROSTER {
            let agent = Arc::new(IndependentAgent::new(
                format!("{}-{}", role, symbol.to_lowercase()),
                role,
                symbol,
                Duration::from_secs(self.config.engine.agent_interval_secs),
                Arc::clone(&self.exchange),
                Arc::clone(&self.llm),
            ));
            coordinator.add_agent(agent).await;
        }
        self.handles.push(Arc::clone(&coordinator).start().await);

        let initial_equity = match self.exchange.get_assets().await {
            Ok(assets) => assets
                .iter()
                .find(|a| a.coin_name == "USDT")
                .map(|a| a.equity)
                .unwrap_or(self.config.risk.min_equity),
            Err(e) => {
                warn!(error = %e, "could not fetch assets at startup, using equity floor");
                self.config.risk.min_equity
            }
        };

        let risk = RiskEngine::new(initial_equity, self.config.risk.clone());
        let mut hot_loop = HotLoop::new(
            symbol,
            risk,
            coordinator.advisory_watch(),
            coordinator.config_watch(),
            Arc::clone(&self.exchange),
            self.config.engine.price_window,
        );

        // startup position sync; a transient failure here is retried by
        // the loop's own slow timer
        if let Err(e) = hot_loop.reconcile().await {
            warn!(symbol, error = %e, "initial position sync failed");
        }

        let engine_config = self.config.engine.clone();
        let stop_rx = self.shutdown_rx.clone();
        let feed_for_loop = Arc::clone(&feed);
        self.handles.push(tokio::spawn(async move {
            hot_loop.run(feed_for_loop, engine_config, stop_rx).await;
        }));

        self.runtimes.push(SymbolRuntime {
            symbol: symbol.to_string(),
            feed,
            coordinator,
        });
        Ok(())
    }

    /// Heartbeat until a shutdown signal arrives
    async fn watch_loop(&mut self) {
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.engine.heartbeat_secs));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    for runtime in &self.runtimes {
                        let price = runtime.feed.latest().await.map(|t| t.last_price);
                        let advisory = runtime.coordinator.latest_advisory();
                        info!(
                            symbol = %runtime.symbol,
                            price = ?price,
                            advisory = ?advisory.as_ref().map(|a| (a.action, a.confidence)),
                            "heartbeat"
                        );
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("interrupt received, shutting down"),
                        Err(e) => warn!(error = %e, "signal listener failed, shutting down"),
                    }
                    return;
                }
                _ = shutdown_rx.changed() => {
                    return;
                }
            }
        }
    }

    /// Cooperative stop: flag every task, then drain with a short timeout
    pub async fn shutdown(&mut self) {
        info!("supervisor draining");
        let _ = self.shutdown_tx.send(true);

        for runtime in &self.runtimes {
            runtime.feed.stop();
            runtime.coordinator.stop().await;
        }

        let drain = Duration::from_secs(DRAIN_TIMEOUT_SECS);
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(drain, handle).await.is_err() {
                warn!("task did not drain in time, detaching");
            }
        }
        info!("supervisor stopped");
    }
}
