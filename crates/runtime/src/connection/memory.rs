//! In-process connector for tests and embedding.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::link::{Connector, Link};
use crate::error::ConnectError;

/// The control-plane side of one in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
	/// Frames the relay sent.
	pub from_relay: mpsc::UnboundedReceiver<String>,
	/// Frames to deliver to the relay.
	pub to_relay: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
	/// Next frame from the relay as JSON, `None` once the relay hung up.
	pub async fn recv(&mut self) -> Option<Value> {
		let raw = self.from_relay.recv().await?;
		serde_json::from_str(&raw).ok()
	}

	/// Next frame if one is already queued.
	pub fn try_recv(&mut self) -> Option<Value> {
		let raw = self.from_relay.try_recv().ok()?;
		serde_json::from_str(&raw).ok()
	}

	pub fn send<T: Serialize>(&self, frame: &T) -> bool {
		match serde_json::to_string(frame) {
			Ok(raw) => self.to_relay.send(raw).is_ok(),
			Err(_) => false,
		}
	}

	/// Drops the peer, which the relay observes as a disconnect.
	pub fn close(self) {}
}

#[derive(Debug, Default)]
struct Behaviour {
	unreachable: Option<String>,
	preflight_delay: Option<Duration>,
	handshake_error: Option<String>,
	handshake_delay: Option<Duration>,
}

/// Connector whose links are channel pairs handed to the test as
/// [`MemoryPeer`]s.
pub struct MemoryConnector {
	behaviour: Mutex<Behaviour>,
	peers: mpsc::UnboundedSender<MemoryPeer>,
	preflights: AtomicUsize,
	handshakes: AtomicUsize,
}

impl MemoryConnector {
	pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
		let (peers, peers_rx) = mpsc::unbounded_channel();
		let connector = Arc::new(Self {
			behaviour: Mutex::new(Behaviour::default()),
			peers,
			preflights: AtomicUsize::new(0),
			handshakes: AtomicUsize::new(0),
		});
		(connector, peers_rx)
	}

	/// Makes preflight fail with `reason` until cleared with `None`.
	pub fn set_unreachable(&self, reason: Option<&str>) {
		self.behaviour.lock().unreachable = reason.map(str::to_owned);
	}

	/// Holds every preflight for `delay` before answering.
	pub fn set_preflight_delay(&self, delay: Option<Duration>) {
		self.behaviour.lock().preflight_delay = delay;
	}

	pub fn set_handshake_error(&self, reason: Option<&str>) {
		self.behaviour.lock().handshake_error = reason.map(str::to_owned);
	}

	pub fn set_handshake_delay(&self, delay: Option<Duration>) {
		self.behaviour.lock().handshake_delay = delay;
	}

	pub fn preflights(&self) -> usize {
		self.preflights.load(Ordering::SeqCst)
	}

	pub fn handshakes(&self) -> usize {
		self.handshakes.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Connector for MemoryConnector {
	async fn preflight(&self) -> Result<(), ConnectError> {
		self.preflights.fetch_add(1, Ordering::SeqCst);
		let (delay, unreachable) = {
			let behaviour = self.behaviour.lock();
			(behaviour.preflight_delay, behaviour.unreachable.clone())
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		match unreachable {
			Some(reason) => Err(ConnectError::Unreachable(reason)),
			None => Ok(()),
		}
	}

	async fn open(&self) -> Result<Link, ConnectError> {
		self.handshakes.fetch_add(1, Ordering::SeqCst);
		let (delay, error) = {
			let behaviour = self.behaviour.lock();
			(behaviour.handshake_delay, behaviour.handshake_error.clone())
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if let Some(reason) = error {
			return Err(ConnectError::HandshakeFailed(reason));
		}

		let (outbound, from_relay) = mpsc::unbounded_channel();
		let (to_relay, inbound) = mpsc::unbounded_channel();
		self.peers
			.send(MemoryPeer { from_relay, to_relay })
			.map_err(|_| ConnectError::HandshakeFailed("no listener for memory link".to_string()))?;
		Ok(Link { outbound, inbound })
	}
}
