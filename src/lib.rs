pub mod analysis;
pub mod config;
pub mod error;
pub mod ml;
pub mod models;
pub mod processor;
pub mod storage;

pub use error::{PipelineError, Result};
