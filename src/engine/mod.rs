pub mod hot_loop;
pub mod risk;
pub mod supervisor;

pub use hot_loop::{Dispatch, HotLoop};
pub use risk::{RiskEngine, RiskStatus, RiskUpdate};
pub use supervisor::Supervisor;
