//! pw-relay runtime - the resilient remote-debugging relay core
//!
//! One long-lived [`Relay`] keeps a single control-plane connection and
//! multiplexes it across any number of locally attached pages:
//!
//! - **Connection**: deduplicated connect with preflight, handshake timeout,
//!   backoff-driven reconnect, and request/response correlation
//! - **Registry**: page ↔ session ↔ target bookkeeping, child sessions
//! - **Lifecycle**: attach/detach state machine per page
//! - **Router**: inbound `forwardCDPCommand` resolution and special cases
//! - **Forwarder**: local events upstream, reannouncement after reconnect
//!
//! # Architecture
//!
//! ```text
//!   control plane ──link──┐
//!                         ▼
//!   ┌───────────────────────────────────┐
//!   │ Relay                             │
//!   │  ConnectionManager  PendingTable  │
//!   │  SessionRegistry                  │
//!   └──────┬───────────────────▲────────┘
//!          │ DebugBackend      │ RelayEvent channel
//!          │ PageHost          │
//!   ┌──────▼───────────────────┴────────┐
//!   │ host browser                      │
//!   └───────────────────────────────────┘
//! ```
//!
//! The host supplies [`DebugBackend`], [`PageHost`], [`StatusSink`] and a
//! [`Connector`]; everything else lives in the relay.

pub mod backend;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod eligibility;
pub mod error;
mod forwarder;
mod lifecycle;
pub mod registry;
mod relay;
mod router;
pub mod status;

pub use backend::{
	DebugBackend, EventReceiver, EventSender, PageEvent, PageHost, PageInfo, RelayEvent, TargetInfo, event_channel,
};
pub use backoff::Backoff;
pub use config::{BackoffPolicy, RelayConfig, SettleDelays};
pub use connection::{ConnectHistory, Connector, Link, MemoryConnector, MemoryPeer, WebSocketConnector};
pub use eligibility::is_eligible;
pub use error::{BackendError, ConnectError, Error, Result};
pub use lifecycle::AttachOutcome;
pub use pw_relay_protocol::{InventoryEntry, PageId};
pub use relay::{Relay, RelaySnapshot};
pub use status::{PageStatus, StatusSink};
