use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of an open perpetual position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Open position for one symbol; at most one per hot loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
}

/// What the evaluator wants to do, before venue-code translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Long,
    Short,
    Close,
}

/// Venue side codes: 1=open-long, 2=close-short, 3=open-short, 4=close-long.
///
/// Declarative mapping over (direction, current position side); `None`
/// means no order is needed. Reversals surface as the close leg: the
/// opposing open happens on a later qualifying tick.
pub fn side_code(direction: TradeDirection, position: Option<PositionSide>) -> Option<u8> {
    use PositionSide::{Long, Short};
    use TradeDirection as D;

    match (direction, position) {
        (D::Long, None) => Some(1),
        (D::Long, Some(Short)) => Some(2),
        (D::Long, Some(Long)) => None,
        (D::Short, None) => Some(3),
        (D::Short, Some(Long)) => Some(4),
        (D::Short, Some(Short)) => None,
        (D::Close, Some(Long)) => Some(4),
        (D::Close, Some(Short)) => Some(2),
        (D::Close, None) => None,
    }
}

/// Whether a venue side code reduces an existing position
pub fn is_close_code(code: u8) -> bool {
    code == 2 || code == 4
}
