pub mod encoders;
pub mod fallback_policy;
pub mod feature_engineer;
pub mod price_cleaner;
pub mod record_normalizer;

pub use encoders::*;
pub use fallback_policy::*;
pub use feature_engineer::*;
pub use price_cleaner::*;
pub use record_normalizer::*;
