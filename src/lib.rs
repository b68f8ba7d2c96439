pub mod bucket;
pub mod error;
pub mod ingest;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod reliability;
pub mod segment;
pub mod types;

pub use error::{LottrError, Result};
