pub mod convert;
pub mod types;
pub mod db;
pub mod error;

pub use types::*;
pub use error::{IndexerError, Result};
