pub mod agents;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod llm;
pub mod signal;

pub use agents::{AgentRole, IndependentAgent, LeadCoordinator};
pub use config::{AppConfig, TradingConfig};
pub use domain::{Advisory, AdvisoryAction, AgentReport, Position, Tick};
pub use engine::{HotLoop, RiskEngine, Supervisor};
pub use error::{QuorumError, Result};
pub use exchange::{BitgetClient, ExchangeClient};
pub use feed::MarketDataFeed;
pub use llm::LlmClient;
