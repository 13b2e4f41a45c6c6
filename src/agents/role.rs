//! Analyst roles and their fixed analysis contracts.
//!
//! The role decides which exchange inputs the agent gathers and which
//! system prompt frames the model call. The set is closed; adding a role
//! is a code change, not configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Technical,
    Structure,
    Market,
    Sentiment,
    Risk,
    Momentum,
    Bull,
    Bear,
    Fundamentals,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Technical => "technical",
            AgentRole::Structure => "structure",
            AgentRole::Market => "market",
            AgentRole::Sentiment => "sentiment",
            AgentRole::Risk => "risk",
            AgentRole::Momentum => "momentum",
            AgentRole::Bull => "bull",
            AgentRole::Bear => "bear",
            AgentRole::Fundamentals => "fundamentals",
        }
    }

    /// System prompt framing this role's model call
    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentRole::Technical => {
                "You are a technical analyst for perpetual futures. You receive \
                 pre-computed indicator values (RSI, EMA, MACD, Bollinger bands, ATR). \
                 Judge the chart setup only; ignore narratives."
            }
            AgentRole::Structure => {
                "You are a market microstructure analyst. You receive order-book \
                 imbalance, spread, funding, and current account posture. Judge \
                 where resting liquidity will push price."
            }
            AgentRole::Market => {
                "You are a market-state analyst. You receive the current ticker and \
                 top-of-book depth. Judge immediate conditions only."
            }
            AgentRole::Sentiment => {
                "You are a sentiment analyst. You receive the funding rate and the \
                 24h price change. Judge positioning crowding and squeeze risk."
            }
            AgentRole::Risk => {
                "You are a risk officer. You receive account assets and open \
                 positions. Judge whether adding exposure is prudent right now; \
                 lean bearish when in doubt."
            }
            AgentRole::Momentum => {
                "You are a momentum analyst. You receive trend indicators over \
                 recent candles. Judge trend strength and continuation odds."
            }
            AgentRole::Bull => {
                "You argue the strongest credible bull case from the data provided. \
                 Your confidence reflects how strong that case actually is."
            }
            AgentRole::Bear => {
                "You argue the strongest credible bear case from the data provided. \
                 Your confidence reflects how strong that case actually is."
            }
            AgentRole::Fundamentals => {
                "You are a derivatives-fundamentals analyst. You receive ticker and \
                 funding data. Classify the basis/carry regime and judge direction."
            }
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trips_lowercase() {
        let role: AgentRole = serde_json::from_str("\"technical\"").unwrap();
        assert_eq!(role, AgentRole::Technical);
        assert_eq!(serde_json::to_string(&AgentRole::Bear).unwrap(), "\"bear\"");
    }

    #[test]
    fn every_role_has_a_prompt() {
        let roles = [
            AgentRole::Technical,
            AgentRole::Structure,
            AgentRole::Market,
            AgentRole::Sentiment,
            AgentRole::Risk,
            AgentRole::Momentum,
            AgentRole::Bull,
            AgentRole::Bear,
            AgentRole::Fundamentals,
        ];
        for role in roles {
            assert!(!role.system_prompt().is_empty());
            assert_eq!(role.to_string(), role.as_str());
        }
    }
}
