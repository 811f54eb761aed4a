//! Requests the relay issued to the control plane, awaiting responses.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Error;

pub(crate) type Reply = std::result::Result<Value, Error>;

struct Waiter {
	/// Connection the request went out on.
	epoch: u64,
	tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct Inner {
	last_id: u64,
	waiters: HashMap<u64, Waiter>,
}

/// Ids are never reused, so a late response can never satisfy a newer request.
#[derive(Default)]
pub(crate) struct PendingTable {
	inner: Mutex<Inner>,
}

impl PendingTable {
	pub(crate) fn register(&self, epoch: u64) -> PendingRequest<'_> {
		let (tx, rx) = oneshot::channel();
		let mut inner = self.inner.lock();
		inner.last_id += 1;
		let id = inner.last_id;
		inner.waiters.insert(id, Waiter { epoch, tx });
		PendingRequest {
			id,
			rx,
			table: self,
			done: false,
		}
	}

	/// Completes request `id` if it was issued on connection `epoch`.
	pub(crate) fn resolve(&self, id: u64, epoch: u64, reply: Reply) -> bool {
		let waiter = {
			let mut inner = self.inner.lock();
			match inner.waiters.get(&id) {
				Some(w) if w.epoch == epoch => inner.waiters.remove(&id),
				_ => None,
			}
		};
		match waiter {
			Some(waiter) => {
				let _ = waiter.tx.send(reply);
				true
			}
			None => false,
		}
	}

	/// Fails every outstanding request with [`Error::Disconnected`].
	pub(crate) fn fail_all(&self) -> usize {
		let drained: Vec<Waiter> = self.inner.lock().waiters.drain().map(|(_, w)| w).collect();
		let count = drained.len();
		for waiter in drained {
			let _ = waiter.tx.send(Err(Error::Disconnected));
		}
		count
	}

	pub(crate) fn len(&self) -> usize {
		self.inner.lock().waiters.len()
	}

	fn forget(&self, id: u64) {
		self.inner.lock().waiters.remove(&id);
	}
}

/// Handle to one outstanding request. Dropping it before completion removes
/// the table entry.
pub(crate) struct PendingRequest<'a> {
	pub(crate) id: u64,
	rx: oneshot::Receiver<Reply>,
	table: &'a PendingTable,
	done: bool,
}

impl PendingRequest<'_> {
	pub(crate) async fn wait(mut self) -> Reply {
		let reply = (&mut self.rx).await;
		self.done = true;
		reply.unwrap_or(Err(Error::Disconnected))
	}
}

impl Drop for PendingRequest<'_> {
	fn drop(&mut self) {
		if !self.done {
			self.table.forget(self.id);
		}
	}
}
