//! Control-plane link transport.
//!
//! A [`Link`] is a pair of channels: frames queued on `outbound` are written
//! to the peer, frames read from the peer arrive on `inbound`. The inbound
//! channel closing is the only close/error signal the relay needs.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::ConnectError;

/// An open control-plane connection.
#[derive(Debug)]
pub struct Link {
	pub outbound: mpsc::UnboundedSender<String>,
	pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens control-plane links. Timeouts are applied by the caller.
#[async_trait]
pub trait Connector: Send + Sync {
	/// Cheap liveness probe of the control-plane host.
	async fn preflight(&self) -> Result<(), ConnectError>;

	/// Performs the handshake and returns the open link.
	async fn open(&self) -> Result<Link, ConnectError>;
}

/// Production connector: HTTP preflight, then a WebSocket.
pub struct WebSocketConnector {
	preflight_url: String,
	relay_url: String,
	http: reqwest::Client,
}

impl WebSocketConnector {
	pub fn new(config: &RelayConfig) -> Self {
		Self {
			preflight_url: config.preflight_url(),
			relay_url: config.relay_url(),
			http: reqwest::Client::new(),
		}
	}
}

#[async_trait]
impl Connector for WebSocketConnector {
	async fn preflight(&self) -> Result<(), ConnectError> {
		// Any HTTP answer proves the host is up; status codes are the
		// handshake's problem.
		let response = self
			.http
			.get(&self.preflight_url)
			.send()
			.await
			.map_err(|e| ConnectError::Unreachable(format!("{}: {e}", self.preflight_url)))?;
		debug!(target = "pw.relay", status = %response.status(), url = %self.preflight_url, "preflight ok");
		Ok(())
	}

	async fn open(&self) -> Result<Link, ConnectError> {
		let (socket, _) = connect_async(self.relay_url.as_str())
			.await
			.map_err(|e| ConnectError::HandshakeFailed(format!("{}: {e}", self.relay_url)))?;

		let (mut ws_tx, mut ws_rx) = socket.split();
		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();

		tokio::spawn(async move {
			while let Some(text) = outbound_rx.recv().await {
				if let Err(err) = ws_tx.send(Message::Text(text)).await {
					warn!(target = "pw.relay", error = %err, "control-plane write failed");
					break;
				}
			}
			let _ = ws_tx.close().await;
		});

		tokio::spawn(async move {
			while let Some(msg) = ws_rx.next().await {
				let text = match msg {
					Ok(Message::Text(text)) => text,
					Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
						Ok(text) => text,
						Err(_) => {
							debug!(target = "pw.relay", "dropping non-UTF-8 binary frame");
							continue;
						}
					},
					Ok(Message::Close(frame)) => {
						debug!(target = "pw.relay", ?frame, "control plane closed the connection");
						break;
					}
					Ok(_) => continue,
					Err(err) => {
						warn!(target = "pw.relay", error = %err, "control-plane socket error");
						break;
					}
				};
				if inbound_tx.send(text).is_err() {
					break;
				}
			}
		});

		Ok(Link { outbound, inbound })
	}
}
