pub mod error;
pub mod logger;
pub mod similarity;
pub mod token_estimator;

pub use error::{ApiError, ModelError, ParseError, RetrievalError};
