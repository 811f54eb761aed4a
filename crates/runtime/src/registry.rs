//! Authoritative attachment state: page ↔ session ↔ target, plus child
//! sessions the backend spawns under a page.
//!
//! The session and child indexes are derived views kept in step with the
//! attachment map; nothing outside this module mutates them.

use std::collections::HashMap;

use pw_relay_protocol::{InventoryEntry, PageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachState {
	Connecting,
	/// Session and target always travel together.
	Attached { session_id: String, target_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAttachment {
	pub page: PageId,
	pub state: AttachState,
	/// Tie-breaker for "first attached page".
	pub attach_order: u64,
}

impl PageAttachment {
	pub fn session_id(&self) -> Option<&str> {
		match &self.state {
			AttachState::Attached { session_id, .. } => Some(session_id),
			AttachState::Connecting => None,
		}
	}

	pub fn target_id(&self) -> Option<&str> {
		match &self.state {
			AttachState::Attached { target_id, .. } => Some(target_id),
			AttachState::Connecting => None,
		}
	}

	pub fn is_attached(&self) -> bool {
		matches!(self.state, AttachState::Attached { .. })
	}
}

/// Where an inbound command should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
	pub page: PageId,
	/// The page's own top-level session.
	pub session_id: String,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
	pages: HashMap<PageId, PageAttachment>,
	sessions: HashMap<String, PageId>,
	children: HashMap<String, PageId>,
	next_order: u64,
	next_session: u64,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts tracking `page` as connecting and returns the attempt's
	/// `attach_order`. `None` if the page is already tracked.
	pub fn begin(&mut self, page: PageId) -> Option<u64> {
		if self.pages.contains_key(&page) {
			return None;
		}
		self.next_order += 1;
		self.pages.insert(
			page,
			PageAttachment {
				page,
				state: AttachState::Connecting,
				attach_order: self.next_order,
			},
		);
		Some(self.next_order)
	}

	/// Drops the connecting entry of attempt `order`. Attached pages and
	/// later attempts on the same page are left alone. False if the attempt
	/// no longer owned the entry.
	pub fn abandon(&mut self, page: PageId, order: u64) -> bool {
		if self.is_attempt(page, order) {
			self.pages.remove(&page);
			true
		} else {
			false
		}
	}

	pub fn is_connecting(&self, page: PageId) -> bool {
		self.pages.get(&page).is_some_and(|a| !a.is_attached())
	}

	/// True while attempt `order` still owns the page's connecting entry.
	pub fn is_attempt(&self, page: PageId, order: u64) -> bool {
		self.pages
			.get(&page)
			.is_some_and(|a| !a.is_attached() && a.attach_order == order)
	}

	pub fn contains(&self, page: PageId) -> bool {
		self.pages.contains_key(&page)
	}

	/// Fresh session id, unique for the registry's lifetime.
	pub fn mint_session_id(&mut self, page: PageId) -> String {
		self.next_session += 1;
		format!("pw-tab-{page}-{}", self.next_session)
	}

	/// Promotes `page` to attached. Replaces any previous session of the page.
	pub fn register(&mut self, page: PageId, session_id: String, target_id: String) {
		let order = match self.pages.get(&page) {
			Some(existing) => {
				if let Some(old) = existing.session_id() {
					self.sessions.remove(old);
				}
				existing.attach_order
			}
			None => {
				self.next_order += 1;
				self.next_order
			}
		};
		self.sessions.insert(session_id.clone(), page);
		self.pages.insert(
			page,
			PageAttachment {
				page,
				state: AttachState::Attached { session_id, target_id },
				attach_order: order,
			},
		);
	}

	/// Removes every trace of `page`, child sessions included.
	pub fn unregister(&mut self, page: PageId) -> Option<PageAttachment> {
		let attachment = self.pages.remove(&page)?;
		if let Some(session) = attachment.session_id() {
			self.sessions.remove(session);
		}
		self.children.retain(|_, owner| *owner != page);
		Some(attachment)
	}

	pub fn get(&self, page: PageId) -> Option<&PageAttachment> {
		self.pages.get(&page)
	}

	pub fn session_of(&self, page: PageId) -> Option<String> {
		self.pages.get(&page)?.session_id().map(str::to_owned)
	}

	/// Top-level sessions win over child sessions.
	pub fn lookup_by_session(&self, session_id: &str) -> Option<PageId> {
		self.sessions
			.get(session_id)
			.or_else(|| self.children.get(session_id))
			.copied()
	}

	pub fn lookup_by_target(&self, target_id: &str) -> Option<PageId> {
		self.pages
			.values()
			.find(|a| a.target_id() == Some(target_id))
			.map(|a| a.page)
	}

	/// Records a child session. Ignored unless `page` is attached.
	pub fn record_child_attach(&mut self, child_session_id: &str, page: PageId) -> bool {
		if !self.pages.get(&page).is_some_and(PageAttachment::is_attached) {
			return false;
		}
		self.children.insert(child_session_id.to_string(), page);
		true
	}

	pub fn record_child_detach(&mut self, child_session_id: &str) -> Option<PageId> {
		self.children.remove(child_session_id)
	}

	/// Child sessions do not survive a control-plane reconnect.
	pub fn clear_children(&mut self) -> usize {
		let count = self.children.len();
		self.children.clear();
		count
	}

	pub fn child_count(&self) -> usize {
		self.children.len()
	}

	/// Attached pages in attach order.
	pub fn attached(&self) -> Vec<&PageAttachment> {
		let mut attached: Vec<_> = self.pages.values().filter(|a| a.is_attached()).collect();
		attached.sort_by_key(|a| a.attach_order);
		attached
	}

	pub fn connecting(&self) -> Vec<PageId> {
		let mut pages: Vec<_> = self.pages.values().filter(|a| !a.is_attached()).collect();
		pages.sort_by_key(|a| a.attach_order);
		pages.into_iter().map(|a| a.page).collect()
	}

	pub fn attached_pages(&self) -> Vec<PageId> {
		self.attached().into_iter().map(|a| a.page).collect()
	}

	pub fn inventory(&self) -> Vec<InventoryEntry> {
		self.attached()
			.into_iter()
			.filter_map(|a| match &a.state {
				AttachState::Attached { session_id, target_id } => Some(InventoryEntry {
					page_id: a.page,
					session_id: session_id.clone(),
					target_id: target_id.clone(),
				}),
				AttachState::Connecting => None,
			})
			.collect()
	}

	/// Resolves a forwarded command: by session (top-level then child), then
	/// by explicit target id, then the first attached page.
	///
	/// The last step is best effort: with several pages attached, callers
	/// that care which one runs the command must pass a session or target.
	pub fn resolve(&self, session_id: Option<&str>, target_id: Option<&str>) -> Option<Route> {
		let page = session_id
			.and_then(|s| self.lookup_by_session(s))
			.or_else(|| target_id.and_then(|t| self.lookup_by_target(t)))
			.or_else(|| self.attached().first().map(|a| a.page))?;
		let session_id = self.session_of(page)?;
		Some(Route { page, session_id })
	}
}
