//! Control-plane connection management.
//!
//! Exactly one connection lifecycle is active at a time:
//!
//! - concurrent [`Relay::ensure_connected`] callers share one in-flight
//!   attempt and all observe its outcome,
//! - at most one reconnect timer is armed,
//! - each installed link gets a fresh epoch; stale readers and late responses
//!   from an older epoch are ignored.
//!
//! # Connect sequence
//!
//! 1. Preflight the host (bounded by `preflight_timeout`) → `Unreachable`
//! 2. Open the link (bounded by `handshake_timeout`) → `HandshakeFailed`
//! 3. Install: reset backoff, flip connect history, start the frame reader,
//!    and on a *re*connection spawn reannouncement
//!
//! Under always-on, the reconnect timer re-runs the eligibility sweep rather
//! than only reconnecting.
//!
//! Failure is returned to the caller; retry scheduling is the caller's job.

mod link;
mod memory;
mod pending;


use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use pw_relay_protocol::{Frame, PING, Request, Response, notify};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use link::{Connector, Link, WebSocketConnector};
pub use memory::{MemoryConnector, MemoryPeer};
pub(crate) use pending::PendingTable;

use crate::backoff::Backoff;
use crate::config::BackoffPolicy;
use crate::error::{ConnectError, Error, Result};
use crate::relay::Relay;
use crate::status::PageStatus;

type Attempt = Shared<BoxFuture<'static, std::result::Result<(), ConnectError>>>;

/// Whether a connection has ever succeeded in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectHistory {
	NeverConnected,
	ConnectedBefore,
}

struct LinkHandle {
	epoch: u64,
	outbound: mpsc::UnboundedSender<String>,
}

struct ConnState {
	link: Option<LinkHandle>,
	connecting: Option<Attempt>,
	history: ConnectHistory,
	last_epoch: u64,
	reconnect_armed: bool,
	backoff: Backoff,
}

/// Result of installing a fresh link.
struct Installed {
	epoch: u64,
	reconnected: bool,
}

pub(crate) struct ConnectionManager {
	state: Mutex<ConnState>,
}

impl ConnectionManager {
	pub(crate) fn new(policy: BackoffPolicy) -> Self {
		Self {
			state: Mutex::new(ConnState {
				link: None,
				connecting: None,
				history: ConnectHistory::NeverConnected,
				last_epoch: 0,
				reconnect_armed: false,
				backoff: Backoff::new(policy),
			}),
		}
	}

	pub(crate) fn is_connected(&self) -> bool {
		self.state.lock().link.is_some()
	}

	pub(crate) fn history(&self) -> ConnectHistory {
		self.state.lock().history
	}

	pub(crate) fn current_epoch(&self) -> Option<u64> {
		self.state.lock().link.as_ref().map(|l| l.epoch)
	}

	pub(crate) fn sender(&self) -> Option<(u64, mpsc::UnboundedSender<String>)> {
		self.state
			.lock()
			.link
			.as_ref()
			.map(|l| (l.epoch, l.outbound.clone()))
	}

	/// `None` when already connected; otherwise the in-flight attempt,
	/// started with `start` if there was none.
	///
	/// `start` runs under the state lock, so the attempt it spawns cannot
	/// reach [`Self::finish`] before it has been recorded here.
	fn join_or_start(&self, start: impl FnOnce() -> Attempt) -> Option<Attempt> {
		let mut state = self.state.lock();
		if state.link.is_some() {
			return None;
		}
		Some(state.connecting.get_or_insert_with(start).clone())
	}

	/// Ends the in-flight attempt, installing `outbound` if it succeeded.
	fn finish(&self, outbound: Option<mpsc::UnboundedSender<String>>) -> Option<Installed> {
		let mut state = self.state.lock();
		state.connecting = None;
		let outbound = outbound?;
		state.last_epoch += 1;
		let epoch = state.last_epoch;
		state.link = Some(LinkHandle { epoch, outbound });
		state.backoff.reset();
		let reconnected = state.history == ConnectHistory::ConnectedBefore;
		state.history = ConnectHistory::ConnectedBefore;
		Some(Installed { epoch, reconnected })
	}

	/// Drops the link if it is still the one from `epoch`.
	fn clear_if_current(&self, epoch: u64) -> bool {
		let mut state = self.state.lock();
		if state.link.as_ref().is_some_and(|l| l.epoch == epoch) {
			state.link = None;
			true
		} else {
			false
		}
	}

	fn clear(&self) -> Option<u64> {
		self.state.lock().link.take().map(|l| l.epoch)
	}

	/// Arms the reconnect timer, returning its delay. `None` if a timer is
	/// already armed or the link is open.
	fn arm_reconnect(&self) -> Option<Duration> {
		let mut state = self.state.lock();
		if state.reconnect_armed || state.link.is_some() {
			return None;
		}
		state.reconnect_armed = true;
		Some(state.backoff.next_delay())
	}

	fn disarm_reconnect(&self) {
		self.state.lock().reconnect_armed = false;
	}

	pub(crate) fn reconnect_armed(&self) -> bool {
		self.state.lock().reconnect_armed
	}
}

impl Relay {
	/// Resolves once a control-plane connection is open.
	///
	/// Joins the in-flight attempt if there is one; never starts a second.
	/// Boxed because reconnection re-enters attach, which calls back here.
	pub fn ensure_connected(self: &Arc<Self>) -> BoxFuture<'static, std::result::Result<(), ConnectError>> {
		let attempt = self.conn.join_or_start(|| {
			let relay = Arc::clone(self);
			let task = tokio::spawn(async move { relay.establish().await });
			async move {
				task.await
					.unwrap_or_else(|e| Err(ConnectError::HandshakeFailed(format!("connect task failed: {e}"))))
			}
			.boxed()
			.shared()
		});
		async move {
			match attempt {
				Some(attempt) => attempt.await,
				None => Ok(()),
			}
		}
		.boxed()
	}

	async fn establish(self: Arc<Self>) -> std::result::Result<(), ConnectError> {
		match self.open_link().await {
			Ok(link) => {
				let Some(installed) = self.conn.finish(Some(link.outbound)) else {
					return Err(ConnectError::HandshakeFailed("link lost during install".to_string()));
				};
				info!(target = "pw.relay", epoch = installed.epoch, url = %self.config.relay_url(), "connected to control plane");
				self.spawn_reader(installed.epoch, link.inbound);
				if installed.reconnected {
					self.status.reconnected();
					let relay = Arc::clone(&self);
					tokio::spawn(async move { relay.resync_after_reconnect().await });
				}
				Ok(())
			}
			Err(err) => {
				self.conn.finish(None);
				warn!(target = "pw.relay", error = %err, "control-plane connect failed");
				Err(err)
			}
		}
	}

	async fn open_link(&self) -> std::result::Result<Link, ConnectError> {
		let preflight_timeout = self.config.preflight_timeout;
		tokio::time::timeout(preflight_timeout, self.connector.preflight())
			.await
			.map_err(|_| ConnectError::Unreachable(format!("no answer from {} within {preflight_timeout:?}", self.config.preflight_url())))??;

		let handshake_timeout = self.config.handshake_timeout;
		tokio::time::timeout(handshake_timeout, self.connector.open())
			.await
			.map_err(|_| ConnectError::HandshakeFailed(format!("handshake timed out after {handshake_timeout:?}")))?
	}

	fn spawn_reader(self: &Arc<Self>, epoch: u64, mut inbound: mpsc::UnboundedReceiver<String>) {
		let relay = Arc::clone(self);
		tokio::spawn(async move {
			while let Some(raw) = inbound.recv().await {
				relay.handle_frame(epoch, &raw);
			}
			relay.on_disconnected(epoch, "connection closed");
		});
	}

	fn handle_frame(self: &Arc<Self>, epoch: u64, raw: &str) {
		let frame = match Frame::parse(raw) {
			Ok(frame) => frame,
			Err(err) => {
				warn!(target = "pw.relay", error = %err, "unparseable control-plane frame");
				return;
			}
		};

		match frame {
			Frame::Response(response) => {
				let reply = match response.error_message() {
					Some(message) => Err(Error::Remote(message)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				if !self.pending.resolve(response.id, epoch, reply) {
					warn!(target = "pw.relay", id = response.id, "response with unknown id");
				}
			}
			Frame::Request(request) => {
				let relay = Arc::clone(self);
				tokio::spawn(async move { relay.handle_request(epoch, request).await });
			}
			Frame::Notification(note) if note.method == PING => {
				self.send_frame(&notify::pong());
			}
			Frame::Notification(note) => {
				debug!(target = "pw.relay", method = %note.method, params = %note.params, "ignoring control-plane notification");
			}
			Frame::Unknown(value) => {
				debug!(target = "pw.relay", frame = %value, "ignoring unknown control-plane frame");
			}
		}
	}

	/// Close handling: fail pending requests, drop child sessions, keep
	/// top-level attachments for reannouncement.
	pub(crate) fn on_disconnected(self: &Arc<Self>, epoch: u64, reason: &str) {
		if !self.conn.clear_if_current(epoch) {
			return;
		}
		let failed = self.pending.fail_all();
		let (children, pages) = {
			let mut registry = self.registry.lock();
			(registry.clear_children(), registry.attached_pages())
		};
		info!(target = "pw.relay", epoch, reason, failed, children, pages = pages.len(), "control plane disconnected");

		for page in pages {
			self.status.page_status(page, PageStatus::Reconnecting, "Reconnecting to control plane");
		}

		if self.always_on() {
			self.schedule_reconnect();
		}
	}

	/// Arms the single reconnect timer. When it fires the always-on sweep is
	/// retried in full, so pages skipped by an earlier failed sweep are picked
	/// up; a connect failure re-arms it with the next backoff delay.
	pub(crate) fn schedule_reconnect(self: &Arc<Self>) {
		let Some(delay) = self.conn.arm_reconnect() else {
			return;
		};
		debug!(target = "pw.relay", ?delay, "reconnect scheduled");
		let relay = Arc::clone(self);
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			relay.conn.disarm_reconnect();
			if !relay.always_on() {
				return;
			}
			if let Err(err) = relay.sweep().await {
				debug!(target = "pw.relay", error = %err, "reconnect attempt failed");
			}
		});
	}

	/// Drops the current link locally. Pending requests fail; the reader of
	/// the dropped link exits without triggering reconnect.
	pub(crate) fn drop_link(&self) {
		if let Some(epoch) = self.conn.clear() {
			let failed = self.pending.fail_all();
			self.registry.lock().clear_children();
			info!(target = "pw.relay", epoch, failed, "control-plane link closed locally");
		}
	}

	/// Issues a request to the control plane and awaits its response.
	///
	/// No implicit timeout; a disconnect fails it immediately.
	pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
		let (epoch, outbound) = self.conn.sender().ok_or(Error::NotConnected)?;
		let pending = self.pending.register(epoch);
		// A disconnect that slipped in before registration already ran
		// fail_all, so bail out instead of waiting forever.
		if self.conn.current_epoch() != Some(epoch) {
			return Err(Error::Disconnected);
		}

		let frame = serde_json::to_string(&Request {
			id: pending.id,
			method: method.to_string(),
			params,
		})?;
		debug!(target = "pw.relay", id = pending.id, method, "sending request");
		outbound.send(frame).map_err(|_| Error::Disconnected)?;
		pending.wait().await
	}

	/// Best-effort send on the current link.
	pub(crate) fn send_frame<T: Serialize>(&self, frame: &T) -> bool {
		let Some((_, outbound)) = self.conn.sender() else {
			debug!(target = "pw.relay", "not connected, dropping outbound frame");
			return false;
		};
		self.send_raw(&outbound, frame)
	}

	/// Sends only if the link from `epoch` is still current.
	pub(crate) fn send_on<T: Serialize>(&self, epoch: u64, frame: &T) -> bool {
		match self.conn.sender() {
			Some((current, outbound)) if current == epoch => self.send_raw(&outbound, frame),
			_ => {
				debug!(target = "pw.relay", epoch, "link changed, dropping reply");
				false
			}
		}
	}

	fn send_raw<T: Serialize>(&self, outbound: &mpsc::UnboundedSender<String>, frame: &T) -> bool {
		match serde_json::to_string(frame) {
			Ok(raw) => outbound.send(raw).is_ok(),
			Err(err) => {
				warn!(target = "pw.relay", error = %err, "failed to encode outbound frame");
				false
			}
		}
	}

	pub(crate) fn respond(&self, epoch: u64, response: Response) -> bool {
		self.send_on(epoch, &response)
	}
}
