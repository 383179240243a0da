//! Durable FIFO of mutations that could not reach the network.
//!
//! The router appends; the sync runner is the only writer of state
//! transitions after that.

mod log;
mod types;

pub use log::{PendingLog, PendingStats};
pub use types::{ActionStatus, PendingAction};
