//! Error types for the relay runtime.

use pw_relay_protocol::PageId;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to bring up the control-plane connection.
///
/// `Clone` so that every caller deduplicated onto one connect attempt
/// observes the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
	/// Preflight against the control-plane host failed (down or firewalled).
	#[error("control plane unreachable: {0}")]
	Unreachable(String),

	/// Host answered but the persistent connection could not be opened.
	#[error("control plane handshake failed: {0}")]
	HandshakeFailed(String),
}

/// Failure reported by the local debugging backend or page host.
///
/// The message is passed to the control plane verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
	pub message: String,
}

impl BackendError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}

/// Errors that can occur in the relay.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Connect(#[from] ConnectError),

	/// The connection a request was issued on dropped before it was answered.
	#[error("control plane disconnected")]
	Disconnected,

	/// No control-plane connection is open.
	#[error("control plane not connected")]
	NotConnected,

	/// The debugging backend refused the page or returned no usable target.
	#[error("failed to attach page {page}: {reason}")]
	AttachFailed { page: PageId, reason: String },

	/// An inbound command matched no attached page.
	#[error("no attached tab for {0}")]
	NoTarget(String),

	#[error(transparent)]
	Backend(#[from] BackendError),

	/// The control plane answered one of our requests with an error.
	#[error("control plane error: {0}")]
	Remote(String),

	/// Malformed or unexpected frame.
	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// True for failures that came from bringing up the connection.
	pub fn is_connect(&self) -> bool {
		matches!(self, Error::Connect(_))
	}
}
