//! Real-time distribution: observer registry, event fan-out, and the
//! WebSocket gateway.
//!
//! The [`Hub`] is the single shared registry of connected observers. Tasks
//! publish events into it; the gateway drains each observer's bounded
//! queue onto its socket. A slow or broken observer is evicted instead of
//! being allowed to stall the fan-out.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::Hub;
pub use protocol::ClientMessage;
