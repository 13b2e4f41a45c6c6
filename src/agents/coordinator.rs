//! Lead coordinator: synthesizes agent reports into the current Advisory.
//!
//! Owns the agent set for one symbol. The hot loop never talks to agents
//! directly; it reads the coordinator's published advisory and trading
//! config through `watch` receivers, so every read is a consistent
//! snapshot and a new value is a single pointer swap.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TradingConfig;
use crate::domain::{Advisory, AdvisoryAction, AgentReport, AgentSignal};
use crate::llm::LlmClient;

use super::agent::IndependentAgent;

const ADVISORY_CHANNEL_CAPACITY: usize = 64;
const MIN_REPORTS: usize = 2;
const SIZE_HINT_MIN: f64 = 0.005;
const SIZE_HINT_MAX: f64 = 0.05;
const STRONG_CONFIDENCE: f64 = 0.7;

const COORDINATOR_SYSTEM_PROMPT: &str = "You are the lead coordinator of a team of \
 market analysts trading one perpetual futures contract. You receive each \
 analyst's latest verdict and must produce a single trading decision. Respect \
 the team: do not recommend long or short unless at least two analysts agree \
 on that direction or one analyst is strongly confident (above 0.7). Respond \
 with strict JSON: {\"action\": \"long\"|\"short\"|\"hold\"|\"close\", \
 \"confidence\": 0.0-1.0, \"position_size_hint\": 0.005-0.05, \
 \"stop_loss_pct\": number, \"take_profit_pct\": number, \
 \"reasoning\": \"brief\"}";

/// Deterministic enforcement of the fusion rule: a directional action
/// survives only with two agents agreeing on that direction or one
/// strongly confident report.
fn enforce_fusion(action: AdvisoryAction, reports: &[AgentReport]) -> AdvisoryAction {
    if action == AdvisoryAction::Hold {
        return action;
    }
    let bulls = reports
        .iter()
        .filter(|r| r.signal == AgentSignal::Bullish)
        .count();
    let bears = reports
        .iter()
        .filter(|r| r.signal == AgentSignal::Bearish)
        .count();
    let consensus = match action {
        AdvisoryAction::Long => bulls >= 2,
        AdvisoryAction::Short => bears >= 2,
        // an exit is not a directional bet; any consensus supports it
        AdvisoryAction::Close => bulls >= 2 || bears >= 2,
        AdvisoryAction::Hold => unreachable!(),
    };
    let strong = reports.iter().any(|r| r.confidence > STRONG_CONFIDENCE);

    if consensus || strong {
        action
    } else {
        AdvisoryAction::Hold
    }
}

fn parse_action(raw: &str) -> Option<AdvisoryAction> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "long" | "buy" => Some(AdvisoryAction::Long),
        "short" | "sell" => Some(AdvisoryAction::Short),
        "hold" | "wait" => Some(AdvisoryAction::Hold),
        "close" | "exit" => Some(AdvisoryAction::Close),
        _ => None,
    }
}

/// Build an Advisory from raw model output plus the reports it saw.
///
/// Malformed fields degrade to hold; clamps are applied here so no
/// out-of-range value ever reaches the hot loop.
fn parse_advisory(value: &serde_json::Value, reports: &[AgentReport]) -> Advisory {
    let action = value
        .get("action")
        .and_then(|v| v.as_str())
        .and_then(parse_action)
        .unwrap_or(AdvisoryAction::Hold);

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    let position_size_hint = value
        .get("position_size_hint")
        .and_then(|v| v.as_f64())
        .unwrap_or(SIZE_HINT_MIN)
        .clamp(SIZE_HINT_MIN, SIZE_HINT_MAX);

    let stop_loss_pct = value
        .get("stop_loss_pct")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(0.02);

    let take_profit_pct = value
        .get("take_profit_pct")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(0.04);

    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let enforced = enforce_fusion(action, reports);
    let confidence = if enforced != action {
        confidence.min(0.5)
    } else {
        confidence
    };

    Advisory {
        action: enforced,
        confidence,
        position_size_hint,
        stop_loss_pct,
        take_profit_pct,
        reasoning,
        generated_at: Utc::now(),
        agent_votes: reports
            .iter()
            .map(|r| (r.agent_name.clone(), r.signal))
            .collect(),
    }
}

/// Owns the agent roster and publishes the team's current advisory
pub struct LeadCoordinator {
    symbol: String,
    interval: Duration,
    warmup: Duration,
    llm: Arc<LlmClient>,
    base_config: TradingConfig,
    agents: RwLock<Vec<Arc<IndependentAgent>>>,
    agent_handles: Mutex<Vec<JoinHandle<()>>>,
    advisory_tx: watch::Sender<Option<Arc<Advisory>>>,
    advisory_rx: watch::Receiver<Option<Arc<Advisory>>>,
    config_tx: watch::Sender<Arc<TradingConfig>>,
    config_rx: watch::Receiver<Arc<TradingConfig>>,
    event_tx: broadcast::Sender<Arc<Advisory>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl LeadCoordinator {
    pub fn new(
        symbol: impl Into<String>,
        base_config: TradingConfig,
        llm: Arc<LlmClient>,
        warmup: Duration,
        interval: Duration,
    ) -> Self {
        let (advisory_tx, advisory_rx) = watch::channel(None);
        let (config_tx, config_rx) = watch::channel(Arc::new(base_config.clone()));
        let (event_tx, _) = broadcast::channel(ADVISORY_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            symbol: symbol.into(),
            interval,
            warmup,
            llm,
            base_config,
            agents: RwLock::new(Vec::new()),
            agent_handles: Mutex::new(Vec::new()),
            advisory_tx,
            advisory_rx,
            config_tx,
            config_rx,
            event_tx,
            stop_tx,
            stop_rx,
        }
    }

    pub async fn add_agent(&self, agent: Arc<IndependentAgent>) {
        self.agents.write().await.push(agent);
    }

    pub fn latest_advisory(&self) -> Option<Arc<Advisory>> {
        self.advisory_rx.borrow().clone()
    }

    /// Hot-loop handle: always reflects the most recent advisory
    pub fn advisory_watch(&self) -> watch::Receiver<Option<Arc<Advisory>>> {
        self.advisory_rx.clone()
    }

    /// Hot-loop handle: the current trading config snapshot
    pub fn config_watch(&self) -> watch::Receiver<Arc<TradingConfig>> {
        self.config_rx.clone()
    }

    pub fn subscribe_advisories(&self) -> broadcast::Receiver<Arc<Advisory>> {
        self.event_tx.subscribe()
    }

    /// Launch all agents (without waiting for first reports) and the
    /// decision loop.
    pub async fn start(self: Arc<Self>) -> JoinHandle<()> {
        {
            let agents = self.agents.read().await;
            let mut handles = self.agent_handles.lock().await;
            for agent in agents.iter() {
                handles.push(Arc::clone(agent).start());
            }
        }

        tokio::spawn(async move { self.run().await })
    }

    /// Stop the decision loop and every owned agent
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        for agent in self.agents.read().await.iter() {
            agent.stop();
        }
    }

    async fn run(&self) {
        info!(symbol = %self.symbol, "lead coordinator starting");
        let mut stop_rx = self.stop_rx.clone();

        // Warmup: give agents a chance to file first reports
        tokio::select! {
            _ = tokio::time::sleep(self.warmup) => {}
            _ = stop_rx.changed() => return,
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = stop_rx.changed() => {
                    info!(symbol = %self.symbol, "lead coordinator stopped");
                    return;
                }
            }
        }
    }

    async fn run_cycle(&self) {
        let reports = self.collect_reports().await;
        if reports.len() < MIN_REPORTS {
            debug!(
                symbol = %self.symbol,
                reports = reports.len(),
                "skipping decision cycle, not enough reports"
            );
            return;
        }

        let summary: String = reports
            .iter()
            .map(|r| {
                format!(
                    "{} [{}]: {} ({:.0}%) - {}\n",
                    r.agent_name,
                    r.role,
                    r.signal,
                    r.confidence * 100.0,
                    r.reasoning
                )
            })
            .collect();

        let user_prompt = format!(
            "Symbol: {}\n\nAnalyst verdicts:\n{}\nSynthesize one decision as strict JSON.",
            self.symbol, summary
        );

        let timeout = self
            .interval
            .checked_sub(Duration::from_secs(2))
            .unwrap_or(Duration::from_secs(5));

        let advisory = match self
            .llm
            .chat_json(COORDINATOR_SYSTEM_PROMPT, &user_prompt, timeout)
            .await
        {
            Ok(value) => parse_advisory(&value, &reports),
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "coordinator cycle failed");
                Advisory::hold("error")
            }
        };

        info!(
            symbol = %self.symbol,
            action = %advisory.action,
            confidence = advisory.confidence,
            "advisory updated"
        );

        self.publish(advisory);
    }

    async fn collect_reports(&self) -> Vec<AgentReport> {
        let agents = self.agents.read().await;
        let mut reports = Vec::with_capacity(agents.len());
        for agent in agents.iter() {
            if let Some(report) = agent.latest_report().await {
                reports.push(report);
            }
        }
        reports
    }

    fn publish(&self, advisory: Advisory) {
        let advisory = Arc::new(advisory);

        // Refresh the hot-path config from the advisory; a fresh Arc is
        // published so readers swap pointers, never observe a torn value.
        let mut config = self.base_config.clone();
        if let Ok(hint) = Decimal::try_from(advisory.position_size_hint) {
            config.risk_per_trade = hint;
        }
        config.stop_loss_pct = advisory.stop_loss_pct;
        config.take_profit_pct = advisory.take_profit_pct;

        let _ = self.config_tx.send(Arc::new(config));
        let _ = self.advisory_tx.send(Some(Arc::clone(&advisory)));
        let _ = self.event_tx.send(advisory);
    }
}
