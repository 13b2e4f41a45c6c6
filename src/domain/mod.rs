pub mod advisory;
pub mod position;
pub mod tick;

pub use advisory::{AdvisoryAction, Advisory, AgentReport, AgentSignal};
pub use position::{side_code, Position, PositionSide, TradeDirection};
pub use tick::{PriceWindow, Tick};
