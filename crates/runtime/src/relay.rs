//! The relay context: one instance owns the connection, the session registry
//! and the pending-request table, and holds the host collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pw_relay_protocol::{InventoryEntry, PageId};
use tracing::{info, warn};

use crate::backend::{DebugBackend, EventReceiver, PageHost};
use crate::config::RelayConfig;
use crate::connection::{ConnectHistory, ConnectionManager, Connector, PendingTable};
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::status::StatusSink;

/// Point-in-time view for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
	pub connected: bool,
	pub history: ConnectHistory,
	pub always_on: bool,
	pub reconnect_armed: bool,
	pub pending_requests: usize,
	pub child_sessions: usize,
	pub attached: Vec<InventoryEntry>,
	pub connecting: Vec<PageId>,
}

pub struct Relay {
	pub(crate) config: RelayConfig,
	always_on: AtomicBool,
	help_offered: AtomicBool,
	pub(crate) backend: Arc<dyn DebugBackend>,
	pub(crate) host: Arc<dyn PageHost>,
	pub(crate) status: Arc<dyn StatusSink>,
	pub(crate) connector: Arc<dyn Connector>,
	pub(crate) conn: ConnectionManager,
	pub(crate) registry: Mutex<SessionRegistry>,
	pub(crate) pending: PendingTable,
}

impl Relay {
	pub fn new(
		config: RelayConfig,
		backend: Arc<dyn DebugBackend>,
		host: Arc<dyn PageHost>,
		status: Arc<dyn StatusSink>,
		connector: Arc<dyn Connector>,
	) -> Arc<Self> {
		Arc::new(Self {
			always_on: AtomicBool::new(config.always_on),
			help_offered: AtomicBool::new(false),
			conn: ConnectionManager::new(config.backoff),
			config,
			backend,
			host,
			status,
			connector,
			registry: Mutex::new(SessionRegistry::new()),
			pending: PendingTable::default(),
		})
	}

	pub fn config(&self) -> &RelayConfig {
		&self.config
	}

	pub fn always_on(&self) -> bool {
		self.always_on.load(Ordering::SeqCst)
	}

	pub fn is_connected(&self) -> bool {
		self.conn.is_connected()
	}

	/// Startup sequence followed by the event forwarder loop. Returns when
	/// the event channel closes.
	///
	/// The startup sweep follows the configured policy; a later
	/// [`Self::set_always_on`] runs its own sweep.
	pub async fn run(self: Arc<Self>, events: EventReceiver) {
		if self.config.always_on && self.always_on() {
			let relay = Arc::clone(&self);
			tokio::spawn(async move {
				if let Err(err) = relay.sweep().await {
					warn!(target = "pw.relay", error = %err, "startup sweep failed");
				}
			});
		}
		self.forward_events(events).await;
	}

	/// Changes the always-on policy. Turning it on runs a full sweep and
	/// returns how many pages were attached.
	pub async fn set_always_on(self: &Arc<Self>, on: bool) -> Result<usize> {
		let was = self.always_on.swap(on, Ordering::SeqCst);
		info!(target = "pw.relay", on, was, "always-on policy changed");
		if on && !was {
			return self.sweep().await;
		}
		Ok(0)
	}

	/// Explicit user toggle: attach an idle page, detach a tracked one.
	/// Returns whether the page is now attached.
	pub async fn toggle(self: &Arc<Self>, page: PageId) -> Result<bool> {
		if self.registry.lock().contains(page) {
			self.detach(page, "toggled off").await;
			return Ok(false);
		}
		self.attach(page).await?;
		Ok(true)
	}

	pub fn snapshot(&self) -> RelaySnapshot {
		let (attached, connecting, child_sessions) = {
			let registry = self.registry.lock();
			(registry.inventory(), registry.connecting(), registry.child_count())
		};
		RelaySnapshot {
			connected: self.conn.is_connected(),
			history: self.conn.history(),
			always_on: self.always_on(),
			reconnect_armed: self.conn.reconnect_armed(),
			pending_requests: self.pending.len(),
			child_sessions,
			attached,
			connecting,
		}
	}

	/// Session id of `page`, if attached.
	pub fn session_of(&self, page: PageId) -> Option<String> {
		self.registry.lock().session_of(page)
	}

	/// Page owning a top-level or child session.
	pub fn page_for_session(&self, session_id: &str) -> Option<PageId> {
		self.registry.lock().lookup_by_session(session_id)
	}

	/// Detaches every page and closes the control-plane link.
	pub async fn shutdown(&self) {
		self.always_on.store(false, Ordering::SeqCst);
		let pages: Vec<PageId> = {
			let registry = self.registry.lock();
			let mut pages = registry.attached_pages();
			pages.extend(registry.connecting());
			pages
		};
		for page in pages {
			self.detach(page, "relay shutting down").await;
		}
		self.drop_link();
	}

	/// True the first time it is called in this process.
	pub(crate) fn take_help_offer(&self) -> bool {
		!self.help_offered.swap(true, Ordering::SeqCst)
	}
}
