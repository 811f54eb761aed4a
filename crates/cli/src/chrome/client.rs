//! One DevTools WebSocket per attached page.
//!
//! Commands for flattened child sessions travel on the same socket with a
//! `sessionId`. Events are pushed into the relay's event channel; the socket
//! closing on its own is reported as a backend-initiated detach.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pw_relay_runtime::{BackendError, EventSender, PageId, RelayEvent};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, BackendError>>>>>;

/// Anything the browser sends on a page socket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Incoming {
	id: Option<u64>,
	method: Option<String>,
	#[serde(default)]
	params: Value,
	result: Option<Value>,
	error: Option<Value>,
	session_id: Option<String>,
}

pub struct PageSocket {
	page: PageId,
	outbound: mpsc::UnboundedSender<String>,
	waiters: Waiters,
	next_id: AtomicU64,
	closed: Arc<AtomicBool>,
	reader: JoinHandle<()>,
}

impl PageSocket {
	pub async fn connect(page: PageId, ws_url: &str, events: EventSender) -> Result<Self, BackendError> {
		let (stream, _) = connect_async(ws_url)
			.await
			.map_err(|e| BackendError::new(format!("cannot open page socket {ws_url}: {e}")))?;
		let (mut sink, mut source) = stream.split();
		debug!(target = "pw.relay", %page, ws_url, "page socket open");

		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		tokio::spawn(async move {
			while let Some(text) = outbound_rx.recv().await {
				if let Err(err) = sink.send(Message::Text(text)).await {
					debug!(target = "pw.relay", error = %err, "page socket write failed");
					break;
				}
			}
			let _ = sink.close().await;
		});

		let waiters: Waiters = Arc::default();
		let closed = Arc::new(AtomicBool::new(false));
		let reader = {
			let waiters = Arc::clone(&waiters);
			let closed = Arc::clone(&closed);
			tokio::spawn(async move {
				let reason = loop {
					match source.next().await {
						Some(Ok(Message::Text(text))) => dispatch(page, &text, &waiters, &events),
						Some(Ok(Message::Close(_))) | None => break "target_closed",
						Some(Ok(_)) => {}
						Some(Err(err)) => {
							warn!(target = "pw.relay", %page, error = %err, "page socket read failed");
							break "target_closed";
						}
					}
				};
				fail_waiters(&waiters, "page socket closed");
				// A local detach already dropped the attachment.
				if !closed.swap(true, Ordering::SeqCst) {
					let _ = events.send(RelayEvent::Detached {
						page,
						reason: reason.to_string(),
					});
				}
			})
		};

		Ok(Self {
			page,
			outbound,
			waiters,
			next_id: AtomicU64::new(1),
			closed,
			reader,
		})
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub async fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value, BackendError> {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let mut frame = json!({ "id": id, "method": method, "params": params });
		if let Some(session_id) = session_id {
			frame["sessionId"] = Value::String(session_id.to_string());
		}

		let (tx, rx) = oneshot::channel();
		self.waiters.lock().insert(id, tx);
		if self.is_closed() || self.outbound.send(frame.to_string()).is_err() {
			self.waiters.lock().remove(&id);
			return Err(BackendError::new(format!("page {} is not attached", self.page)));
		}

		rx.await
			.unwrap_or_else(|_| Err(BackendError::new("page socket closed")))
	}

	/// Closes the socket without reporting a backend detach.
	pub fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.reader.abort();
		fail_waiters(&self.waiters, "page detached");
	}
}

impl Drop for PageSocket {
	fn drop(&mut self) {
		self.close();
	}
}

fn dispatch(page: PageId, text: &str, waiters: &Waiters, events: &EventSender) {
	let incoming: Incoming = match serde_json::from_str(text) {
		Ok(incoming) => incoming,
		Err(err) => {
			warn!(target = "pw.relay", %page, error = %err, "unparseable page socket frame");
			return;
		}
	};

	if let Some(id) = incoming.id {
		let Some(tx) = waiters.lock().remove(&id) else {
			debug!(target = "pw.relay", %page, id, "response for unknown command");
			return;
		};
		let reply = match incoming.error {
			Some(error) => Err(BackendError::new(error_text(&error))),
			None => Ok(incoming.result.unwrap_or(Value::Null)),
		};
		let _ = tx.send(reply);
		return;
	}

	if let Some(method) = incoming.method {
		let _ = events.send(RelayEvent::Protocol {
			page,
			method,
			params: incoming.params,
			session_id: incoming.session_id,
		});
	}
}

/// `{code, message}` errors become their message.
fn error_text(error: &Value) -> String {
	error
		.get("message")
		.and_then(Value::as_str)
		.map(str::to_owned)
		.unwrap_or_else(|| error.to_string())
}

fn fail_waiters(waiters: &Waiters, reason: &str) {
	for (_, tx) in waiters.lock().drain() {
		let _ = tx.send(Err(BackendError::new(reason)));
	}
}
