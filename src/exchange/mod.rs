pub mod bitget;
pub mod signing;
pub mod traits;
pub mod types;

pub use bitget::BitgetClient;
pub use signing::{ApiCredentials, HmacSigner};
pub use traits::ExchangeClient;
pub use types::{
    AiLogAck, AiLogEntry, AssetBalance, Candle, DepthSnapshot, FundingRate, OrderAck,
    OrderRecord, PositionInfo, Ticker,
};
