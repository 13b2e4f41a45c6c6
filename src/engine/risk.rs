//! Synchronous pre-trade risk gate.
//!
//! A plain state machine owned by one hot loop; every operation is O(1)
//! and lock-free because all access is serialized by the owner. Once the
//! breaker trips it latches: no trade passes until an operator resets.

use rust_decimal::Decimal;
use tracing::{error, info};

use crate::config::RiskLimits;
use crate::domain::position::is_close_code;

/// Partial state update; `None` fields are left unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskUpdate {
    pub equity: Option<Decimal>,
    pub position_size: Option<Decimal>,
    pub open_orders: Option<u32>,
}

/// Snapshot of the engine's current state
#[derive(Debug, Clone)]
pub struct RiskStatus {
    pub equity: Decimal,
    pub initial_equity: Decimal,
    pub peak_equity: Decimal,
    pub daily_pnl: Decimal,
    pub position_size: Decimal,
    pub open_orders: u32,
    pub tripped: bool,
    pub trip_reason: Option<String>,
}

/// Armed/Tripped circuit breaker plus position caps
pub struct RiskEngine {
    limits: RiskLimits,
    equity: Decimal,
    initial_equity: Decimal,
    peak_equity: Decimal,
    daily_pnl: Decimal,
    position_size: Decimal,
    open_orders: u32,
    tripped: bool,
    trip_reason: Option<String>,
}

impl RiskEngine {
    pub fn new(initial_equity: Decimal, limits: RiskLimits) -> Self {
        Self {
            limits,
            equity: initial_equity,
            initial_equity,
            peak_equity: initial_equity,
            daily_pnl: Decimal::ZERO,
            position_size: Decimal::ZERO,
            open_orders: 0,
            tripped: false,
            trip_reason: None,
        }
    }

    /// Apply a partial update, maintaining `peak = max(peak, equity)` and
    /// `daily_pnl = equity - initial_equity` in the same step.
    pub fn update_state(&mut self, update: RiskUpdate) {
        if let Some(equity) = update.equity {
            self.equity = equity;
            if equity > self.peak_equity {
                self.peak_equity = equity;
            }
            self.daily_pnl = equity - self.initial_equity;
        }
        if let Some(size) = update.position_size {
            self.position_size = size.abs();
        }
        if let Some(orders) = update.open_orders {
            self.open_orders = orders;
        }
    }

    pub fn set_equity(&mut self, equity: Decimal) {
        self.update_state(RiskUpdate {
            equity: Some(equity),
            ..Default::default()
        });
    }

    pub fn set_position_size(&mut self, size: Decimal) {
        self.update_state(RiskUpdate {
            position_size: Some(size),
            ..Default::default()
        });
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Gate one intended order.
    ///
    /// Rejections for size caps do not trip the breaker; a violated trip
    /// condition both trips and rejects.
    pub fn can_trade(&mut self, side_code: u8, size: Decimal, price: f64) -> bool {
        assert!(
            price.is_finite() && price > 0.0,
            "risk check with invalid price {price}"
        );
        assert!(
            size >= Decimal::ZERO,
            "risk check with negative size {size}"
        );

        if self.tripped {
            return false;
        }

        let projected = if is_close_code(side_code) {
            (self.position_size - size).abs()
        } else {
            self.position_size + size
        };
        if projected > self.limits.max_position_size {
            info!(
                %projected,
                limit = %self.limits.max_position_size,
                "order rejected: position cap"
            );
            return false;
        }

        if self.open_orders >= self.limits.max_open_orders {
            info!(
                open_orders = self.open_orders,
                limit = self.limits.max_open_orders,
                "order rejected: open order cap"
            );
            return false;
        }

        // Drawdown is the sharpest condition, check it first so the trip
        // reason names the real problem when a loss breaches both limits.
        if self.peak_equity > Decimal::ZERO {
            let drawdown = (self.peak_equity - self.equity) / self.peak_equity;
            if drawdown > self.limits.max_drawdown {
                self.trip(format!(
                    "drawdown {:.4} exceeds limit {}",
                    drawdown, self.limits.max_drawdown
                ));
                return false;
            }
        }

        if self.daily_pnl < -self.limits.max_daily_loss {
            self.trip(format!(
                "daily loss {} exceeds limit {}",
                self.daily_pnl, self.limits.max_daily_loss
            ));
            return false;
        }

        if self.equity < self.limits.min_equity {
            self.trip(format!(
                "equity {} below floor {}",
                self.equity, self.limits.min_equity
            ));
            return false;
        }

        true
    }

    /// Latch the breaker
    pub fn trip(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("CIRCUIT BREAKER TRIPPED: {}", reason);
        self.tripped = true;
        self.trip_reason = Some(reason);
    }

    /// Operator re-arm. Re-baselines the peak and the daily PnL anchor so
    /// the condition that tripped does not immediately re-trip.
    pub fn reset(&mut self) {
        info!("circuit breaker reset");
        self.tripped = false;
        self.trip_reason = None;
        self.peak_equity = self.equity;
        self.initial_equity = self.equity;
        self.daily_pnl = Decimal::ZERO;
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            equity: self.equity,
            initial_equity: self.initial_equity,
            peak_equity: self.peak_equity,
            daily_pnl: self.daily_pnl,
            position_size: self.position_size,
            open_orders: self.open_orders,
            tripped: self.tripped,
            trip_reason: self.trip_reason.clone(),
        }
    }
}
