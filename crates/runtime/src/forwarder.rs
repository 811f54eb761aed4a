//! Relays local debugging events upstream and re-synchronises attachments
//! after a reconnect.

use std::sync::Arc;

use pw_relay_protocol::{ATTACHED_TO_TARGET, DETACHED_FROM_TARGET, PageId, TabEvent, TabLifecycle, notify};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{EventReceiver, PageEvent, PageInfo, RelayEvent};
use crate::eligibility::is_eligible;
use crate::lifecycle::Trigger;
use crate::relay::Relay;
use crate::status::PageStatus;

impl Relay {
	/// Single consumer of the relay's inbound event channel.
	pub(crate) async fn forward_events(self: &Arc<Self>, mut events: EventReceiver) {
		while let Some(event) = events.recv().await {
			self.handle_event(event);
		}
		debug!(target = "pw.relay", "event channel closed");
	}

	/// Handles one local event. Anything that awaits the backend is spawned so
	/// forwarding order is kept for the events behind it.
	pub fn handle_event(self: &Arc<Self>, event: RelayEvent) {
		match event {
			RelayEvent::Protocol {
				page,
				method,
				params,
				session_id,
			} => self.forward_protocol_event(page, &method, params, session_id),
			RelayEvent::Detached { page, reason } => {
				self.backend_detached(page, &reason);
			}
			RelayEvent::Page(page_event) => self.handle_page_event(page_event),
		}
	}

	fn forward_protocol_event(&self, page: PageId, method: &str, params: Value, session_id: Option<String>) {
		let top = {
			let mut registry = self.registry.lock();
			let Some(top) = registry.session_of(page) else {
				debug!(target = "pw.relay", %page, method, "event for unattached page dropped");
				return;
			};
			let child = params.get("sessionId").and_then(Value::as_str);
			match (method, child) {
				(ATTACHED_TO_TARGET, Some(child)) => {
					registry.record_child_attach(child, page);
				}
				(DETACHED_FROM_TARGET, Some(child)) => {
					registry.record_child_detach(child);
				}
				_ => {}
			}
			top
		};
		let session = session_id.unwrap_or(top);
		self.send_frame(&notify::forward_event(method, params, Some(&session)));
	}

	fn handle_page_event(self: &Arc<Self>, event: PageEvent) {
		match event {
			PageEvent::Created(info) => {
				self.send_lifecycle(TabEvent::Created, &info);
				let delay = self.config.settle.page_created;
				self.spawn_policy_attach(info, Some(delay));
			}
			PageEvent::Removed(page) => {
				self.send_frame(
					&TabLifecycle {
						event: TabEvent::Removed,
						page_id: page,
						url: None,
						title: None,
					}
					.into_notification(),
				);
				let relay = Arc::clone(self);
				tokio::spawn(async move {
					relay.detach(page, "tab closed").await;
				});
			}
			PageEvent::Updated(info) => {
				self.send_lifecycle(TabEvent::Updated, &info);
			}
			PageEvent::Navigated(info) => {
				self.send_lifecycle(TabEvent::Navigated, &info);
				self.spawn_policy_attach(info, None);
			}
			PageEvent::Activated(info) => {
				self.spawn_policy_attach(info, None);
			}
		}
	}

	fn send_lifecycle(&self, event: TabEvent, info: &PageInfo) {
		let note = TabLifecycle {
			event,
			page_id: info.id,
			url: Some(info.url.clone()).filter(|u| !u.is_empty()),
			title: Some(info.title.clone()).filter(|t| !t.is_empty()),
		}
		.into_notification();
		self.send_frame(&note);
	}

	/// Automatic attach from page activity; only under the always-on policy.
	fn spawn_policy_attach(self: &Arc<Self>, info: PageInfo, settle: Option<std::time::Duration>) {
		if !self.always_on() || self.registry.lock().contains(info.id) {
			return;
		}
		// Created pages often have no address yet; check after settling.
		if settle.is_none() && !is_eligible(&info.url) {
			return;
		}
		let relay = Arc::clone(self);
		tokio::spawn(async move {
			let mut page = info;
			if let Some(delay) = settle {
				tokio::time::sleep(delay).await;
				match relay.host.list_pages().await {
					Ok(pages) => match pages.into_iter().find(|p| p.id == page.id) {
						Some(current) => page = current,
						None => return,
					},
					Err(err) => {
						debug!(target = "pw.relay", page = %page.id, error = %err, "page lookup failed");
						return;
					}
				}
				if !is_eligible(&page.url) {
					return;
				}
			}
			let _ = relay.attach_page(page.id, Trigger::Automatic).await;
		});
	}

	/// Re-validates every recorded attachment against the backend and
	/// re-sends `attached` for the live ones, keeping their session ids.
	/// Pages the backend no longer knows are purged.
	pub async fn reannounce_all(self: &Arc<Self>) -> usize {
		let attached: Vec<(PageId, String)> = {
			let registry = self.registry.lock();
			registry
				.attached()
				.into_iter()
				.filter_map(|a| a.session_id().map(|s| (a.page, s.to_string())))
				.collect()
		};

		let mut announced = 0;
		for (page, session_id) in attached {
			match self.backend.target_info(page).await {
				Ok(info) if !info.target_id.is_empty() => {
					let still_same = {
						let mut registry = self.registry.lock();
						let same = registry.session_of(page).as_deref() == Some(session_id.as_str());
						if same {
							registry.register(page, session_id.clone(), info.target_id.clone());
						}
						same
					};
					if !still_same {
						continue;
					}
					self.announce(&session_id, &info);
					self.status.page_status(page, PageStatus::On, "Attached");
					announced += 1;
				}
				outcome => {
					debug!(target = "pw.relay", %page, ?outcome, "attachment did not survive reconnect");
					if self.registry.lock().unregister(page).is_some() {
						self.status.page_status(page, PageStatus::Off, "Detached while disconnected");
					}
				}
			}
		}
		announced
	}

	/// Post-reconnect sequence: reannounce, sweep, push the inventory.
	pub(crate) async fn resync_after_reconnect(self: &Arc<Self>) {
		let announced = self.reannounce_all().await;
		if self.always_on() {
			if let Err(err) = self.attach_all_eligible().await {
				debug!(target = "pw.relay", error = %err, "post-reconnect sweep failed");
			}
		}
		let tabs = self.push_inventory();
		info!(target = "pw.relay", announced, tabs, "resynchronised after reconnect");
	}

	/// Sends the full attachment inventory upstream.
	pub fn push_inventory(&self) -> usize {
		let inventory = self.registry.lock().inventory();
		self.send_frame(&notify::inventory(&inventory));
		inventory.len()
	}
}
