//! Websocket transaction ingestion.
//!
//! One `transactionSubscribe` subscription whose filters follow the kinds of
//! listeners registered. Each decoded event is handed to every listener of its
//! kind in a spawned, time-bounded call.

pub mod backoff;
pub mod client;
pub mod envelope;
pub mod listener;

pub use backoff::reconnect_delays;
pub use client::{StreamStats, StreamingClient};
pub use envelope::{parse_message, StreamMessage};
pub use listener::{EventListener, ListenerRegistry, SubscriptionFilters};
