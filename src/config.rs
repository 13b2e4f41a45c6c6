use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Symbols to trade (spot notation, e.g. "BTCUSDT")
    pub symbols: Vec<String>,
    pub exchange: ExchangeConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub engine: EngineConfig,
    /// When true, orders are logged but never sent
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: String,
}

fn default_rest_url() -> String {
    "https://api.bitget.com".to_string()
}

fn default_ws_url() -> String {
    "wss://ws.bitget.com/v2/ws/public".to_string()
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: String::new(),
        }
    }
}

/// Language model endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_model_name() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_url(),
            api_key: String::new(),
            name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Per-channel weights for the signal combiner
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalWeights {
    pub obi: f64,
    pub rsi: f64,
    pub ema: f64,
    pub momentum: f64,
    /// Reserved for the funding-rate channel fed to the sentiment digest
    pub funding: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            obi: 0.40,
            rsi: 0.10,
            ema: 0.25,
            momentum: 0.25,
            funding: 0.0,
        }
    }
}

/// Hot-path trading parameters.
///
/// Single writer (the lead coordinator republishes after each advisory),
/// many readers (hot loops) via a `watch` channel of `Arc<TradingConfig>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub weights: SignalWeights,
    /// Minimum |combined signal| to act
    pub signal_threshold: f64,
    /// Minimum effective advisory confidence to act
    pub min_confidence: f64,
    /// Minimum wall-time between order dispatches (per hot loop)
    pub cooldown_secs: u64,
    /// Advisory staleness window (dead-man switch)
    pub decay_window_secs: u64,
    /// Fraction of equity committed per trade
    pub risk_per_trade: Decimal,
    /// Hard cap on position size (contracts)
    pub max_position_size: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            signal_threshold: 0.2,
            min_confidence: 0.6,
            cooldown_secs: 5,
            decay_window_secs: 60,
            risk_per_trade: dec!(0.02),
            max_position_size: dec!(0.05),
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
        }
    }
}

/// Circuit-breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum daily loss before the breaker trips (account currency)
    pub max_daily_loss: Decimal,
    /// Equity floor; trading halts below this
    pub min_equity: Decimal,
    /// Maximum peak-to-equity drawdown fraction
    pub max_drawdown: Decimal,
    /// Hard cap on absolute position size (contracts)
    pub max_position_size: Decimal,
    /// Maximum simultaneously open orders
    pub max_open_orders: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss: dec!(50),
            min_equity: dec!(100),
            max_drawdown: dec!(0.05),
            max_position_size: dec!(0.05),
            max_open_orders: 5,
        }
    }
}

/// Scheduler intervals and window sizes
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Analysis interval per independent agent (seconds)
    #[serde(default = "default_agent_interval")]
    pub agent_interval_secs: u64,
    /// Lead coordinator decision interval (seconds)
    #[serde(default = "default_coordinator_interval")]
    pub coordinator_interval_secs: u64,
    /// Delay before the coordinator's first decision cycle
    #[serde(default = "default_warmup")]
    pub warmup_secs: u64,
    /// Position reconciliation / depth refresh interval
    #[serde(default = "default_reconcile")]
    pub reconcile_secs: u64,
    /// Supervisor heartbeat line interval
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    /// Gap between per-symbol startups in multi-symbol mode
    #[serde(default = "default_stagger")]
    pub stagger_secs: u64,
    /// Price history retained per symbol
    #[serde(default = "default_price_window")]
    pub price_window: usize,
    /// `latest()` ticks older than this trigger the REST fallback
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_agent_interval() -> u64 {
    12
}

fn default_coordinator_interval() -> u64 {
    30
}

fn default_warmup() -> u64 {
    10
}

fn default_reconcile() -> u64 {
    30
}

fn default_heartbeat() -> u64 {
    5
}

fn default_stagger() -> u64 {
    5
}

fn default_price_window() -> usize {
    100
}

fn default_stale_after() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_interval_secs: default_agent_interval(),
            coordinator_interval_secs: default_coordinator_interval(),
            warmup_secs: default_warmup(),
            reconcile_secs: default_reconcile(),
            heartbeat_secs: default_heartbeat(),
            stagger_secs: default_stagger(),
            price_window: default_price_window(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl AppConfig {
    /// Load from optional `quorum.toml` plus environment overrides.
    ///
    /// Nested keys use `__` (e.g. `QUORUM_EXCHANGE__API_KEY`); the flat
    /// variables `MAX_POSITION_SIZE` and `MIN_BALANCE` are also honored.
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name("quorum").required(false))
            .add_source(Environment::with_prefix("QUORUM").separator("__"));

        let mut cfg: AppConfig = builder.build()?.try_deserialize()?;

        if let Ok(raw) = std::env::var("MAX_POSITION_SIZE") {
            if let Ok(v) = raw.parse::<Decimal>() {
                cfg.risk.max_position_size = v;
                cfg.trading.max_position_size = v;
            }
        }
        if let Ok(raw) = std::env::var("MIN_BALANCE") {
            if let Ok(v) = raw.parse::<Decimal>() {
                cfg.risk.min_equity = v;
            }
        }

        Ok(cfg)
    }

    /// Validate config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.symbols.is_empty() {
            errors.push("at least one symbol is required".to_string());
        }
        for symbol in &self.symbols {
            if symbol.trim().is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                errors.push(format!("invalid symbol \"{}\"", symbol));
            }
        }
        if !self.dry_run {
            if self.exchange.api_key.is_empty() {
                errors.push("exchange.api_key is required for live trading".to_string());
            }
            if self.exchange.api_secret.is_empty() {
                errors.push("exchange.api_secret is required for live trading".to_string());
            }
            if self.exchange.passphrase.is_empty() {
                errors.push("exchange.passphrase is required for live trading".to_string());
            }
        }
        if self.model.name.trim().is_empty() {
            errors.push("model.name must not be empty".to_string());
        }
        if self.trading.signal_threshold <= 0.0 {
            errors.push(format!(
                "trading.signal_threshold must be > 0, got {}",
                self.trading.signal_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.trading.min_confidence) {
            errors.push(format!(
                "trading.min_confidence must be in [0, 1], got {}",
                self.trading.min_confidence
            ));
        }
        if self.trading.risk_per_trade <= Decimal::ZERO {
            errors.push("trading.risk_per_trade must be > 0".to_string());
        }
        if self.risk.max_position_size <= Decimal::ZERO {
            errors.push("risk.max_position_size must be > 0".to_string());
        }
        if self.risk.max_drawdown <= Decimal::ZERO || self.risk.max_drawdown >= Decimal::ONE {
            errors.push(format!(
                "risk.max_drawdown must be in (0, 1), got {}",
                self.risk.max_drawdown
            ));
        }
        if self.engine.price_window < 2 {
            errors.push("engine.price_window must be at least 2".to_string());
        }

        errors
    }
}
