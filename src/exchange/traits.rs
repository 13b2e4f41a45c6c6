use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;

use super::types::{
    AiLogAck, AiLogEntry, AssetBalance, Candle, DepthSnapshot, FundingRate, OrderAck,
    OrderRecord, PositionInfo, Ticker,
};

/// Venue REST operations the engine depends on.
///
/// Implementations must be safe for concurrent use behind an `Arc`; every
/// call carries its own timeout. The engine never sees raw JSON.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn get_depth(&self, symbol: &str) -> Result<DepthSnapshot>;

    /// Candles newest-last
    async fn get_candles(&self, symbol: &str, granularity: &str, limit: u32)
        -> Result<Vec<Candle>>;

    async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate>;

    async fn get_assets(&self) -> Result<Vec<AssetBalance>>;

    async fn get_positions(&self) -> Result<Vec<PositionInfo>>;

    async fn get_order_history(&self, symbol: &str) -> Result<Vec<OrderRecord>>;

    /// Market order. `side_code`: 1=open-long, 2=close-short,
    /// 3=open-short, 4=close-long.
    async fn place_order(&self, symbol: &str, side_code: u8, size: Decimal) -> Result<OrderAck>;

    /// Fire-and-forget audit sink; failures must never block trading.
    async fn upload_ai_log(&self, entry: &AiLogEntry) -> Result<AiLogAck>;
}
