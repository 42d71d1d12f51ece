//! Run entry points.
//!
//! - `run_pipeline`: fetch, store, analyze and deliver posts for every enabled source
//! - `RunLock`: keeps two runs from overlapping

pub mod lock;
pub mod process;

pub use lock::RunLock;
pub use process::{Processor, RunStats, run_pipeline};
