#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_relay_runtime::{
	BackendError, DebugBackend, EventSender, MemoryConnector, MemoryPeer, PageHost, PageId, PageInfo, PageStatus, Relay,
	RelayConfig, SettleDelays, StatusSink, TargetInfo, event_channel,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
	pub page: PageId,
	pub method: String,
	pub params: Value,
	pub child: Option<String>,
}

#[derive(Default)]
struct FakeState {
	next_page: u64,
	pages: BTreeMap<PageId, PageInfo>,
	targets: BTreeMap<PageId, String>,
	attached: HashSet<PageId>,
	refused: HashSet<PageId>,
	target_info_delay: Option<Duration>,
	attach_calls: usize,
	detach_calls: usize,
	commands: Vec<SentCommand>,
	activated: Vec<PageId>,
}

/// In-memory debugger and page host.
#[derive(Default)]
pub struct FakeBackend {
	state: Mutex<FakeState>,
}

impl FakeBackend {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn add_page(&self, url: &str) -> PageId {
		let mut state = self.state.lock();
		state.next_page += 1;
		let id = PageId(state.next_page);
		state.pages.insert(
			id,
			PageInfo {
				id,
				url: url.to_string(),
				title: format!("page {}", id.0),
			},
		);
		state.targets.insert(id, format!("T{}", id.0));
		id
	}

	pub fn target_id(&self, page: PageId) -> String {
		self.state.lock().targets[&page].clone()
	}

	/// Reports an empty target id for `page` once attached.
	pub fn blank_target(&self, page: PageId) {
		self.state.lock().targets.insert(page, String::new());
	}

	/// Makes every `target_info` call wait `delay` first.
	pub fn slow_target_info(&self, delay: Option<Duration>) {
		self.state.lock().target_info_delay = delay;
	}

	pub fn refuse_attach(&self, page: PageId) {
		self.state.lock().refused.insert(page);
	}

	/// The page goes away behind the relay's back.
	pub fn lose_page(&self, page: PageId) {
		let mut state = self.state.lock();
		state.pages.remove(&page);
		state.attached.remove(&page);
	}

	pub fn is_attached(&self, page: PageId) -> bool {
		self.state.lock().attached.contains(&page)
	}

	pub fn has_page(&self, page: PageId) -> bool {
		self.state.lock().pages.contains_key(&page)
	}

	pub fn attach_calls(&self) -> usize {
		self.state.lock().attach_calls
	}

	pub fn detach_calls(&self) -> usize {
		self.state.lock().detach_calls
	}

	pub fn commands(&self) -> Vec<SentCommand> {
		self.state.lock().commands.clone()
	}

	pub fn activated(&self) -> Vec<PageId> {
		self.state.lock().activated.clone()
	}
}

#[async_trait]
impl DebugBackend for FakeBackend {
	async fn attach(&self, page: PageId) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		state.attach_calls += 1;
		if state.refused.contains(&page) {
			return Err(BackendError::new("another debugger is attached"));
		}
		if !state.pages.contains_key(&page) {
			return Err(BackendError::new("no such page"));
		}
		state.attached.insert(page);
		Ok(())
	}

	async fn detach(&self, page: PageId) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		state.detach_calls += 1;
		if state.attached.remove(&page) {
			Ok(())
		} else {
			Err(BackendError::new("not attached"))
		}
	}

	async fn send_command(
		&self,
		page: PageId,
		method: &str,
		params: Value,
		child_session: Option<&str>,
	) -> Result<Value, BackendError> {
		let mut state = self.state.lock();
		if !state.attached.contains(&page) {
			return Err(BackendError::new("not attached"));
		}
		state.commands.push(SentCommand {
			page,
			method: method.to_string(),
			params,
			child: child_session.map(str::to_owned),
		});
		Ok(json!({ "page": page.0, "method": method }))
	}

	async fn target_info(&self, page: PageId) -> Result<TargetInfo, BackendError> {
		let delay = self.state.lock().target_info_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let state = self.state.lock();
		let (Some(info), true) = (state.pages.get(&page), state.attached.contains(&page)) else {
			return Err(BackendError::new("not attached"));
		};
		Ok(TargetInfo::from_value(json!({
			"targetInfo": {
				"targetId": state.targets[&page],
				"type": "page",
				"url": info.url,
				"title": info.title,
				"attached": false,
			}
		})))
	}
}

#[async_trait]
impl PageHost for FakeBackend {
	async fn list_pages(&self) -> Result<Vec<PageInfo>, BackendError> {
		Ok(self.state.lock().pages.values().cloned().collect())
	}

	async fn create_page(&self, url: &str) -> Result<PageId, BackendError> {
		Ok(self.add_page(url))
	}

	async fn close_page(&self, page: PageId) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		state.attached.remove(&page);
		state.pages.remove(&page).map(|_| ()).ok_or_else(|| BackendError::new("no such page"))
	}

	async fn activate_page(&self, page: PageId) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		if !state.pages.contains_key(&page) {
			return Err(BackendError::new("no such page"));
		}
		state.activated.push(page);
		Ok(())
	}
}

/// Records everything the relay reports.
#[derive(Default)]
pub struct RecordingStatus {
	updates: Mutex<Vec<(PageId, PageStatus)>>,
	help: Mutex<usize>,
	reconnects: Mutex<usize>,
}

impl RecordingStatus {
	pub fn last(&self, page: PageId) -> Option<PageStatus> {
		self.updates
			.lock()
			.iter()
			.rev()
			.find(|(p, _)| *p == page)
			.map(|(_, s)| *s)
	}

	pub fn history(&self, page: PageId) -> Vec<PageStatus> {
		self.updates
			.lock()
			.iter()
			.filter(|(p, _)| *p == page)
			.map(|(_, s)| *s)
			.collect()
	}

	pub fn help_shown(&self) -> usize {
		*self.help.lock()
	}

	pub fn reconnects(&self) -> usize {
		*self.reconnects.lock()
	}
}

impl StatusSink for RecordingStatus {
	fn page_status(&self, page: PageId, status: PageStatus, _description: &str) {
		self.updates.lock().push((page, status));
	}

	fn first_error_help(&self) {
		*self.help.lock() += 1;
	}

	fn reconnected(&self) {
		*self.reconnects.lock() += 1;
	}
}

pub struct Harness {
	pub relay: Arc<Relay>,
	pub backend: Arc<FakeBackend>,
	pub status: Arc<RecordingStatus>,
	pub connector: Arc<MemoryConnector>,
	pub peers: mpsc::UnboundedReceiver<MemoryPeer>,
	pub events: EventSender,
}

pub fn test_config(always_on: bool) -> RelayConfig {
	RelayConfig {
		always_on,
		settle: SettleDelays {
			page_created: Duration::from_millis(5),
			reenable: Duration::from_millis(1),
			create_target: Duration::from_millis(1),
		},
		..RelayConfig::default()
	}
}

/// A relay over fakes, with its event loop running.
pub fn harness(always_on: bool) -> Harness {
	let backend = FakeBackend::new();
	let status = Arc::new(RecordingStatus::default());
	let (connector, peers) = MemoryConnector::new();
	let relay = Relay::new(
		test_config(always_on),
		backend.clone(),
		backend.clone(),
		status.clone(),
		connector.clone(),
	);
	let (events, events_rx) = event_channel();
	tokio::spawn(Arc::clone(&relay).run(events_rx));
	Harness {
		relay,
		backend,
		status,
		connector,
		peers,
		events,
	}
}

impl Harness {
	pub async fn next_peer(&mut self) -> MemoryPeer {
		tokio::time::timeout(WAIT, self.peers.recv())
			.await
			.expect("no connection within timeout")
			.expect("connector dropped")
	}

	/// Connects and returns the control-plane side of the link.
	pub async fn connect(&mut self) -> MemoryPeer {
		self.relay.ensure_connected().await.unwrap();
		self.next_peer().await
	}
}

pub async fn recv(peer: &mut MemoryPeer) -> Value {
	tokio::time::timeout(WAIT, peer.recv())
		.await
		.expect("no frame within timeout")
		.expect("link closed")
}

/// Reads frames until one matches `pred`, returning it and everything
/// skipped on the way.
pub async fn recv_until(peer: &mut MemoryPeer, pred: impl Fn(&Value) -> bool) -> (Value, Vec<Value>) {
	let mut skipped = Vec::new();
	loop {
		let frame = recv(peer).await;
		if pred(&frame) {
			return (frame, skipped);
		}
		skipped.push(frame);
	}
}

pub fn is_event(frame: &Value, method: &str) -> bool {
	frame["method"] == "forwardCDPEvent" && frame["params"]["method"] == method
}

pub fn is_method(frame: &Value, method: &str) -> bool {
	frame["method"] == method
}

/// Polls `cond` until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
	tokio::time::timeout(WAIT, async {
		while !cond() {
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.expect("condition not reached within timeout");
}

pub fn forward_command(id: u64, params: Value) -> Value {
	json!({ "id": id, "method": "forwardCDPCommand", "params": params })
}
