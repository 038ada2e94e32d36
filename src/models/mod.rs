pub mod data_models;
pub mod feature_schema;

pub use data_models::*;
pub use feature_schema::*;
