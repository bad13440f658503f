mod dataset;
mod error;
pub mod libsvm;
mod shard;
pub mod synthetic;

pub use dataset::{DataPoint, Dataset};
pub use error::{DataErr, Result};
pub use shard::shard_range;
