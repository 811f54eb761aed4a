//! Page discovery over the DevTools HTTP endpoints.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use pw_relay_runtime::{BackendError, PageEvent, PageId, PageInfo};
use serde::Deserialize;
use tracing::debug;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// One entry of `GET /json/list`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChromeTarget {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub title: String,
	/// Absent while another client (such as an open DevTools window) holds
	/// the page on older browsers.
	#[serde(default)]
	pub web_socket_debugger_url: Option<String>,
}

impl ChromeTarget {
	pub fn is_page(&self) -> bool {
		self.kind == "page"
	}
}

#[derive(Debug, Clone)]
struct Known {
	info: PageInfo,
	target_id: String,
	ws_url: Option<String>,
}

/// Stable numeric ids for DevTools target ids, and the last listing seen.
#[derive(Debug, Default)]
pub struct PageTable {
	next_id: u64,
	by_target: HashMap<String, PageId>,
	pages: BTreeMap<PageId, Known>,
}

impl PageTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Id for `target_id`, allocating one on first sight. Ids are never
	/// reused within a process.
	pub fn page_id(&mut self, target_id: &str) -> PageId {
		if let Some(id) = self.by_target.get(target_id) {
			return *id;
		}
		self.next_id += 1;
		let id = PageId(self.next_id);
		self.by_target.insert(target_id.to_string(), id);
		id
	}

	pub fn target_id(&self, page: PageId) -> Option<&str> {
		self.pages.get(&page).map(|k| k.target_id.as_str())
	}

	pub fn ws_url(&self, page: PageId) -> Option<&str> {
		self.pages.get(&page).and_then(|k| k.ws_url.as_deref())
	}

	pub fn pages(&self) -> Vec<PageInfo> {
		self.pages.values().map(|k| k.info.clone()).collect()
	}

	/// Records one page without emitting events (used right after creating
	/// it, before the next poll).
	pub fn insert(&mut self, target: &ChromeTarget) -> PageId {
		let id = self.page_id(&target.id);
		self.pages.insert(id, known(id, target));
		id
	}

	/// Replaces the current listing and reports what changed.
	///
	/// Only `page` targets are tracked. A changed URL is a navigation; a
	/// changed title alone is an update.
	pub fn apply(&mut self, listing: &[ChromeTarget]) -> Vec<PageEvent> {
		let mut events = Vec::new();
		let mut next = BTreeMap::new();

		for target in listing.iter().filter(|t| t.is_page()) {
			let id = self.page_id(&target.id);
			let current = known(id, target);
			match self.pages.get(&id) {
				None => events.push(PageEvent::Created(current.info.clone())),
				Some(prev) if prev.info.url != current.info.url => {
					events.push(PageEvent::Navigated(current.info.clone()))
				}
				Some(prev) if prev.info.title != current.info.title => {
					events.push(PageEvent::Updated(current.info.clone()))
				}
				Some(_) => {}
			}
			next.insert(id, current);
		}

		for id in self.pages.keys() {
			if !next.contains_key(id) {
				events.push(PageEvent::Removed(*id));
			}
		}

		self.pages = next;
		events
	}
}

fn known(id: PageId, target: &ChromeTarget) -> Known {
	Known {
		info: PageInfo {
			id,
			url: target.url.clone(),
			title: target.title.clone(),
		},
		target_id: target.id.clone(),
		ws_url: target.web_socket_debugger_url.clone(),
	}
}

/// The browser's DevTools HTTP interface.
#[derive(Debug, Clone)]
pub struct DevToolsEndpoint {
	base: Url,
	http: reqwest::Client,
}

impl DevToolsEndpoint {
	pub fn new(base: Url) -> Result<Self, BackendError> {
		let http = reqwest::Client::builder()
			.timeout(HTTP_TIMEOUT)
			.build()
			.map_err(|e| BackendError::new(format!("http client: {e}")))?;
		Ok(Self { base, http })
	}

	pub fn base(&self) -> &Url {
		&self.base
	}

	pub async fn list(&self) -> Result<Vec<ChromeTarget>, BackendError> {
		let url = self.url("json/list")?;
		let response = self.http.get(url).send().await.map_err(http_error)?;
		response.error_for_status().map_err(http_error)?.json().await.map_err(http_error)
	}

	/// Opens a new page. Recent browsers only accept `PUT` here.
	pub async fn new_page(&self, page_url: &str) -> Result<ChromeTarget, BackendError> {
		let mut url = self.url("json/new")?;
		url.set_query(Some(page_url));
		debug!(target = "pw.relay", %url, "opening page");
		let response = self.http.put(url).send().await.map_err(http_error)?;
		response.error_for_status().map_err(http_error)?.json().await.map_err(http_error)
	}

	pub async fn close(&self, target_id: &str) -> Result<(), BackendError> {
		self.simple(&format!("json/close/{target_id}")).await
	}

	pub async fn activate(&self, target_id: &str) -> Result<(), BackendError> {
		self.simple(&format!("json/activate/{target_id}")).await
	}

	async fn simple(&self, path: &str) -> Result<(), BackendError> {
		let url = self.url(path)?;
		let response = self.http.get(url).send().await.map_err(http_error)?;
		response.error_for_status().map_err(http_error)?;
		Ok(())
	}

	fn url(&self, path: &str) -> Result<Url, BackendError> {
		self.base
			.join(path)
			.map_err(|e| BackendError::new(format!("bad DevTools path {path}: {e}")))
	}
}

fn http_error(err: reqwest::Error) -> BackendError {
	BackendError::new(format!("DevTools endpoint: {err}"))
}
