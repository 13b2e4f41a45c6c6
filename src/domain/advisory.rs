use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agents::AgentRole;

/// Directional lean reported by an independent agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSignal {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for AgentSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentSignal::Bullish => write!(f, "bullish"),
            AgentSignal::Bearish => write!(f, "bearish"),
            AgentSignal::Neutral => write!(f, "neutral"),
        }
    }
}

/// Latest structured output of one independent agent.
///
/// Exactly one report per agent is retained; prior rounds are discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_name: String,
    pub role: AgentRole,
    pub timestamp: DateTime<Utc>,
    pub signal: AgentSignal,
    pub confidence: f64,
    pub reasoning: String,
    /// Role-specific digest the agent based its call on
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AgentReport {
    /// Fallback report for any failed analysis round
    pub fn neutral(agent_name: &str, role: AgentRole, reasoning: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            role,
            timestamp: Utc::now(),
            signal: AgentSignal::Neutral,
            confidence: 0.5,
            reasoning: reasoning.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Action the lead coordinator recommends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryAction {
    Long,
    Short,
    Hold,
    Close,
}

impl std::fmt::Display for AdvisoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdvisoryAction::Long => write!(f, "long"),
            AdvisoryAction::Short => write!(f, "short"),
            AdvisoryAction::Hold => write!(f, "hold"),
            AdvisoryAction::Close => write!(f, "close"),
        }
    }
}

/// The hot loop's only view of AI state: the most recent coordinator output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advisory {
    pub action: AdvisoryAction,
    pub confidence: f64,
    /// Fraction of equity to commit, clamped to [0.005, 0.05]
    pub position_size_hint: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub reasoning: String,
    pub generated_at: DateTime<Utc>,
    /// signal per agent name at synthesis time
    pub agent_votes: HashMap<String, AgentSignal>,
}

impl Advisory {
    /// Safe default when the model output is missing or malformed
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            action: AdvisoryAction::Hold,
            confidence: 0.5,
            position_size_hint: 0.005,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            reasoning: reasoning.into(),
            generated_at: Utc::now(),
            agent_votes: HashMap::new(),
        }
    }

    /// Dead-man check: an advisory older than the decay window is no-signal
    pub fn is_stale(&self, now: DateTime<Utc>, decay_window_secs: u64) -> bool {
        now - self.generated_at > Duration::seconds(decay_window_secs as i64)
    }

    /// Action and confidence after confidence decay.
    ///
    /// Stale advisories behave exactly like `hold` at zero confidence.
    pub fn effective(&self, now: DateTime<Utc>, decay_window_secs: u64) -> (AdvisoryAction, f64) {
        if self.is_stale(now, decay_window_secs) {
            (AdvisoryAction::Hold, 0.0)
        } else {
            (self.action, self.confidence)
        }
    }

    /// Directional bias in [-1, 1] for the signal combiner
    pub fn bias(&self, now: DateTime<Utc>, decay_window_secs: u64) -> f64 {
        match self.effective(now, decay_window_secs) {
            (AdvisoryAction::Long, conf) => conf,
            (AdvisoryAction::Short, conf) => -conf,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_advisory_is_effective() {
        let advisory = Advisory {
            action: AdvisoryAction::Long,
            confidence: 0.8,
            ..Advisory::hold("test")
        };
        let now = advisory.generated_at;
        assert_eq!(advisory.effective(now, 60), (AdvisoryAction::Long, 0.8));
        assert_eq!(advisory.bias(now, 60), 0.8);
    }

    #[test]
    fn stale_advisory_decays_to_hold() {
        let advisory = Advisory {
            action: AdvisoryAction::Long,
            confidence: 0.95,
            ..Advisory::hold("test")
        };
        let now = advisory.generated_at + Duration::seconds(120);
        assert_eq!(advisory.effective(now, 60), (AdvisoryAction::Hold, 0.0));
        assert_eq!(advisory.bias(now, 60), 0.0);
    }

    #[test]
    fn short_bias_is_negative() {
        let advisory = Advisory {
            action: AdvisoryAction::Short,
            confidence: 0.7,
            ..Advisory::hold("test")
        };
        let now = advisory.generated_at;
        assert_eq!(advisory.bias(now, 60), -0.7);
    }

    #[test]
    fn exactly_at_window_is_not_stale() {
        let advisory = Advisory::hold("test");
        let now = advisory.generated_at + Duration::seconds(60);
        assert!(!advisory.is_stale(now, 60));
        assert!(advisory.is_stale(now + Duration::seconds(1), 60));
    }
}
