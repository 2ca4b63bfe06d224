//! Price feed WebSocket client.
//!
//! Provides the upstream mark price connection with:
//! - Fixed-delay reconnection that replays the subscription set once
//! - Heartbeat via WebSocket ping frames and pong timeout detection
//! - Idempotent per-symbol subscribe/unsubscribe through [`FeedHandle`]
//! - Best-effort registrar notification before each feed-level frame
//! - Parsed [`PriceTick`]s delivered on a bounded channel in arrival order

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod registrar;
pub mod subscription;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, FeedHandle};
pub use error::{WsError, WsResult};
pub use message::{parse_frame, FeedCommand, FeedFrame, PriceTick, TICK_MESSAGE_TYPE};
pub use registrar::{DynRegistrar, HttpRegistrar, RecordingRegistrar, SymbolRegistrar};
pub use subscription::{SubscriptionControl, SubscriptionSet};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
