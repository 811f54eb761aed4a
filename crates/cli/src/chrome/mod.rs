//! Chrome DevTools backend: pages come from the HTTP listing, debugging goes
//! over each page's own WebSocket.

mod client;
mod discovery;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_relay_runtime::{BackendError, DebugBackend, EventSender, PageHost, PageId, PageInfo, RelayEvent, TargetInfo};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

pub use client::PageSocket;
pub use discovery::{ChromeTarget, DevToolsEndpoint, PageTable};

pub struct ChromeHost {
	endpoint: DevToolsEndpoint,
	table: Mutex<PageTable>,
	sockets: Mutex<HashMap<PageId, Arc<PageSocket>>>,
	events: EventSender,
}

impl ChromeHost {
	pub fn new(base: Url, events: EventSender) -> Result<Arc<Self>, BackendError> {
		Ok(Arc::new(Self {
			endpoint: DevToolsEndpoint::new(base)?,
			table: Mutex::new(PageTable::new()),
			sockets: Mutex::new(HashMap::new()),
			events,
		}))
	}

	/// Fetches the listing once and pushes the differences as page events.
	pub async fn poll(&self) -> Result<usize, BackendError> {
		let listing = self.endpoint.list().await?;
		let changes = self.table.lock().apply(&listing);
		let count = changes.len();
		for change in changes {
			if self.events.send(RelayEvent::Page(change)).is_err() {
				break;
			}
		}
		Ok(count)
	}

	/// Polls until the relay's event channel closes.
	pub async fn watch(self: Arc<Self>, every: Duration) {
		info!(target = "pw.relay", endpoint = %self.endpoint.base(), ?every, "watching browser pages");
		let mut ticker = tokio::time::interval(every);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		let mut reachable = true;
		loop {
			ticker.tick().await;
			if self.events.is_closed() {
				break;
			}
			match self.poll().await {
				Ok(changes) => {
					if !reachable {
						info!(target = "pw.relay", "browser reachable again");
					}
					reachable = true;
					if changes > 0 {
						debug!(target = "pw.relay", changes, "page listing changed");
					}
				}
				Err(err) if reachable => {
					warn!(target = "pw.relay", error = %err, "cannot list browser pages");
					reachable = false;
				}
				Err(_) => {}
			}
		}
	}

	fn socket(&self, page: PageId) -> Result<Arc<PageSocket>, BackendError> {
		self.sockets
			.lock()
			.get(&page)
			.filter(|s| !s.is_closed())
			.cloned()
			.ok_or_else(|| BackendError::new(format!("page {page} is not attached")))
	}

	fn target_id(&self, page: PageId) -> Result<String, BackendError> {
		self.table
			.lock()
			.target_id(page)
			.map(str::to_owned)
			.ok_or_else(|| BackendError::new(format!("no such page {page}")))
	}

	/// Debugger URL for `page`, refreshing the listing once if the page is
	/// newer than the last poll.
	async fn ws_url(&self, page: PageId) -> Result<String, BackendError> {
		if let Some(url) = self.table.lock().ws_url(page) {
			return Ok(url.to_string());
		}
		self.poll().await?;
		let table = self.table.lock();
		if table.target_id(page).is_none() {
			return Err(BackendError::new(format!("no such page {page}")));
		}
		table
			.ws_url(page)
			.map(str::to_owned)
			.ok_or_else(|| BackendError::new("page is already being debugged by another client"))
	}
}

#[async_trait]
impl DebugBackend for ChromeHost {
	async fn attach(&self, page: PageId) -> Result<(), BackendError> {
		if self.socket(page).is_ok() {
			return Err(BackendError::new(format!("page {page} is already attached")));
		}
		let ws_url = self.ws_url(page).await?;
		let socket = PageSocket::connect(page, &ws_url, self.events.clone()).await?;
		self.sockets.lock().insert(page, Arc::new(socket));
		Ok(())
	}

	async fn detach(&self, page: PageId) -> Result<(), BackendError> {
		match self.sockets.lock().remove(&page) {
			Some(socket) => {
				socket.close();
				Ok(())
			}
			None => Err(BackendError::new(format!("page {page} is not attached"))),
		}
	}

	async fn send_command(
		&self,
		page: PageId,
		method: &str,
		params: Value,
		child_session: Option<&str>,
	) -> Result<Value, BackendError> {
		self.socket(page)?.send(method, params, child_session).await
	}

	async fn target_info(&self, page: PageId) -> Result<TargetInfo, BackendError> {
		let result = self.socket(page)?.send("Target.getTargetInfo", json!({}), None).await?;
		Ok(TargetInfo::from_value(result))
	}
}

#[async_trait]
impl PageHost for ChromeHost {
	async fn list_pages(&self) -> Result<Vec<PageInfo>, BackendError> {
		self.poll().await?;
		Ok(self.table.lock().pages())
	}

	async fn create_page(&self, url: &str) -> Result<PageId, BackendError> {
		let target = self.endpoint.new_page(url).await?;
		Ok(self.table.lock().insert(&target))
	}

	async fn close_page(&self, page: PageId) -> Result<(), BackendError> {
		let target_id = self.target_id(page)?;
		self.endpoint.close(&target_id).await
	}

	async fn activate_page(&self, page: PageId) -> Result<(), BackendError> {
		let target_id = self.target_id(page)?;
		self.endpoint.activate(&target_id).await
	}
}
