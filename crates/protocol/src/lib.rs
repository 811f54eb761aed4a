//! Control-plane wire types for the pw-relay debugging relay.
//!
//! The relay keeps one persistent JSON message stream open to an external
//! orchestrator. Every frame on that stream is one of:
//!
//! - a request `{ id, method, params? }` (either direction),
//! - a response `{ id, result? , error? }` correlated to a request by id,
//! - a notification `{ method, params? }` with no id.
//!
//! This crate only describes frames and the notification payloads the relay
//! emits; it never interprets forwarded debugging-protocol content.

pub mod frame;
pub mod notify;

pub use frame::{ForwardParams, Frame, Notification, PageId, Request, Response};
pub use notify::{InventoryEntry, TabEvent, TabLifecycle};

/// Method of an inbound request asking the relay to run a debugging command.
pub const FORWARD_CDP_COMMAND: &str = "forwardCDPCommand";
/// Method of an outbound notification carrying a debugging-protocol event.
pub const FORWARD_CDP_EVENT: &str = "forwardCDPEvent";
/// Method of the outbound attachment inventory notification.
pub const TAB_INVENTORY: &str = "tabInventory";
/// Method of the outbound page lifecycle notification.
pub const TAB_LIFECYCLE: &str = "tabLifecycle";
/// Inbound heartbeat.
pub const PING: &str = "ping";
/// Outbound heartbeat answer.
pub const PONG: &str = "pong";

/// Debugging-protocol event announcing a new session.
pub const ATTACHED_TO_TARGET: &str = "Target.attachedToTarget";
/// Debugging-protocol event announcing a session ended.
pub const DETACHED_FROM_TARGET: &str = "Target.detachedFromTarget";
