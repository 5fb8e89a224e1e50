//! Real-time rug detection over decoded liquidity-removal events.

pub mod rug_guard;
pub mod watch_index;

pub use rug_guard::{CloseOutcome, GuardStats, RugGuard};
pub use watch_index::WatchedMintIndex;
