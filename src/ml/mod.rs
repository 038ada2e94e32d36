pub mod predictor;
pub mod regressor;
pub mod trainer;

pub use predictor::*;
pub use regressor::*;
pub use trainer::*;
