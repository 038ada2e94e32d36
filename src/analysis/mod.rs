pub mod competitor;
pub mod market_report;

pub use competitor::*;
pub use market_report::*;
