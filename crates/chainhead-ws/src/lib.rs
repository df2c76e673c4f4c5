//! chainhead-ws — WebSocket `eth_subscribe` transport for ChainHead.
//!
//! # Features
//! - `newHeads` subscription feeding the head tracker
//! - Per-job `logs` subscriptions with address/topic filters
//! - One terminal error per subscription; the tracker owns reconnects
//! - Best-effort `eth_unsubscribe` on cancel

pub mod client;
pub mod subscriptions;

pub use client::{JobLog, WsClientConfig, WsTransport};
pub use subscriptions::{log_filter, SubscriptionId, SubscriptionKind};
