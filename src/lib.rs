//! mint-sentry - real-time launch discovery, staged enrichment and rug guard for Solana
//!
//! New tokens are decoded straight from the launch program's transaction
//! stream, re-evaluated by a persistent time-staged scheduler, and turned into
//! signals and positions. A separate guard watches open positions for pool
//! liquidity being pulled and closes them within seconds.

pub mod app;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod discovery;
pub mod guard;
pub mod metrics;
pub mod scheduler;
pub mod scoring;
pub mod sources;
pub mod storage;
pub mod stream;
pub mod trading;
pub mod types;

// Re-export main types for convenience
pub use app::App;
pub use config::AppConfig;
pub use decoder::{decode_transaction, DecodedEvent, EventKind};
pub use types::{Position, Token};
