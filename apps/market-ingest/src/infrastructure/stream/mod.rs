//! Streaming WebSocket Adapter
//!
//! - **codec**: inbound frame decoding, subscription encoding
//! - **consumer**: connection lifecycle, subscription, dispatch
//! - **reconnect**: capped exponential backoff
//! - **state**: connection state and counters for health reporting
//! - **watchdog**: inactivity and pong timeouts

pub mod codec;
pub mod consumer;
pub mod reconnect;
pub mod state;
pub mod watchdog;

pub use codec::{CHANNEL_KEYS, CodecError, Frame, FrameCodec};
pub use consumer::{StreamConfig, StreamConsumer, StreamError};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{ConnectionState, StreamSnapshot, StreamStatus};
pub use watchdog::{ActivityWatchdog, Expiry};
