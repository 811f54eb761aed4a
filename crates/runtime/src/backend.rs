//! Capabilities the relay consumes from its host: the local debugging backend
//! and the page host, plus the single inbound event channel both feed.

use async_trait::async_trait;
use pw_relay_protocol::PageId;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BackendError;

/// Backend description of the page an attachment points at.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInfo {
	/// Backend identifier for the page. Empty means unusable.
	pub target_id: String,
	/// Full metadata as reported, forwarded upstream untouched.
	pub raw: Value,
}

impl TargetInfo {
	/// Accepts either a bare target-info object or one wrapped in
	/// `{ "targetInfo": .. }`, as `Target.getTargetInfo` returns it.
	pub fn from_value(value: Value) -> Self {
		let raw = match value.get("targetInfo") {
			Some(inner) if inner.is_object() => inner.clone(),
			_ => value,
		};
		let target_id = raw.get("targetId").and_then(Value::as_str).unwrap_or_default().to_string();
		Self { target_id, raw }
	}
}

/// A page as the page host knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
	pub id: PageId,
	pub url: String,
	pub title: String,
}

/// Attach, detach and command primitives against a page.
#[async_trait]
pub trait DebugBackend: Send + Sync {
	async fn attach(&self, page: PageId) -> Result<(), BackendError>;

	async fn detach(&self, page: PageId) -> Result<(), BackendError>;

	/// Runs a debugging command. `child_session` routes into a session the
	/// backend spawned underneath the page's own attachment.
	async fn send_command(
		&self,
		page: PageId,
		method: &str,
		params: Value,
		child_session: Option<&str>,
	) -> Result<Value, BackendError>;

	/// Fails when the page is not (or no longer) attached.
	async fn target_info(&self, page: PageId) -> Result<TargetInfo, BackendError>;
}

/// Page enumeration and window-level operations.
#[async_trait]
pub trait PageHost: Send + Sync {
	async fn list_pages(&self) -> Result<Vec<PageInfo>, BackendError>;

	/// Opens a new page in the background.
	async fn create_page(&self, url: &str) -> Result<PageId, BackendError>;

	async fn close_page(&self, page: PageId) -> Result<(), BackendError>;

	/// Focuses the owning window and brings the page to the foreground.
	async fn activate_page(&self, page: PageId) -> Result<(), BackendError>;
}

/// Page lifecycle changes observed by the page host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
	Created(PageInfo),
	Removed(PageId),
	/// Title or other metadata changed.
	Updated(PageInfo),
	/// A navigation finished; `url` is the new address.
	Navigated(PageInfo),
	Activated(PageInfo),
}

/// Everything the relay observes locally, keyed by page.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
	/// A debugging-protocol event from an attached page.
	Protocol {
		page: PageId,
		method: String,
		params: Value,
		session_id: Option<String>,
	},
	/// The backend dropped the attachment on its own.
	Detached { page: PageId, reason: String },
	Page(PageEvent),
}

pub type EventSender = mpsc::UnboundedSender<RelayEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RelayEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
	mpsc::unbounded_channel()
}
