//! Per-page attach/detach state machine: idle → connecting → attached, with
//! detach or any failure returning to idle.

use std::sync::Arc;

use pw_relay_protocol::{PageId, notify};
use tracing::{debug, info, warn};

use crate::backend::TargetInfo;
use crate::eligibility::is_eligible;
use crate::error::{Error, Result};
use crate::relay::Relay;
use crate::status::PageStatus;

/// Who asked for an attach, which decides how failures surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
	/// User toggle or control-plane request: errors are shown.
	Explicit,
	/// Policy trigger or sweep: errors are swallowed.
	Automatic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
	Attached { session_id: String, target_id: String },
	/// The page already had an attachment (possibly still connecting).
	AlreadyTracked,
}

impl Relay {
	/// Explicit attach of `page`. A no-op if it is already tracked.
	pub async fn attach(self: &Arc<Self>, page: PageId) -> Result<AttachOutcome> {
		self.attach_page(page, Trigger::Explicit).await
	}

	pub(crate) async fn attach_page(self: &Arc<Self>, page: PageId, trigger: Trigger) -> Result<AttachOutcome> {
		let Some(order) = self.registry.lock().begin(page) else {
			debug!(target = "pw.relay", %page, "attach skipped, page already tracked");
			return Ok(AttachOutcome::AlreadyTracked);
		};
		self.status.page_status(page, PageStatus::Connecting, "Connecting to control plane");

		match self.attach_tracked(page, order).await {
			Ok((session_id, target_id)) => {
				info!(target = "pw.relay", %page, session = %session_id, target = %target_id, "page attached");
				self.status.page_status(page, PageStatus::On, "Attached");
				Ok(AttachOutcome::Attached { session_id, target_id })
			}
			Err(err) => {
				if err.is_connect() && self.always_on() {
					self.schedule_reconnect();
				}
				if !self.registry.lock().abandon(page, order) {
					// Detached or superseded meanwhile; that path reported status.
					debug!(target = "pw.relay", %page, error = %err, "stale attach dropped");
					return Err(err);
				}
				match trigger {
					Trigger::Explicit => {
						warn!(target = "pw.relay", %page, error = %err, "attach failed");
						self.status.page_status(page, PageStatus::Error, &err.to_string());
						if self.take_help_offer() {
							self.status.first_error_help();
						}
					}
					Trigger::Automatic => {
						debug!(target = "pw.relay", %page, error = %err, "automatic attach failed");
						self.status.page_status(page, PageStatus::Off, "Not attached");
					}
				}
				Err(err)
			}
		}
	}

	/// Steps after the page has been marked connecting by attempt `order`.
	async fn attach_tracked(self: &Arc<Self>, page: PageId, order: u64) -> Result<(String, String)> {
		self.ensure_connected().await?;

		self.backend.attach(page).await.map_err(|e| Error::AttachFailed {
			page,
			reason: e.message,
		})?;

		let info = match self.backend.target_info(page).await {
			Ok(info) if !info.target_id.is_empty() => info,
			Ok(_) => return Err(self.abort_attach(page, "backend returned no target id").await),
			Err(e) => return Err(self.abort_attach(page, &e.message).await),
		};

		let (session_id, superseded) = {
			let mut registry = self.registry.lock();
			if registry.is_attempt(page, order) {
				let session_id = registry.mint_session_id(page);
				registry.register(page, session_id.clone(), info.target_id.clone());
				(Some(session_id), false)
			} else {
				(None, registry.contains(page))
			}
		};
		let Some(session_id) = session_id else {
			// A newer attempt owns the page and the backend attachment now.
			if superseded {
				return Err(Error::AttachFailed {
					page,
					reason: "superseded by a newer attach".to_string(),
				});
			}
			return Err(self.abort_attach(page, "page detached while attaching").await);
		};

		self.announce(&session_id, &info);
		Ok((session_id, info.target_id))
	}

	async fn abort_attach(&self, page: PageId, reason: &str) -> Error {
		if let Err(err) = self.backend.detach(page).await {
			debug!(target = "pw.relay", %page, error = %err, "detach after failed attach");
		}
		Error::AttachFailed {
			page,
			reason: reason.to_string(),
		}
	}

	pub(crate) fn announce(&self, session_id: &str, info: &TargetInfo) -> bool {
		self.send_frame(&notify::attached(session_id, info.raw.clone()))
	}

	/// Detaches `page`. Harmless when the page has no attachment.
	pub async fn detach(&self, page: PageId, reason: &str) -> bool {
		let Some(attachment) = self.registry.lock().unregister(page) else {
			return false;
		};
		if let (Some(session), Some(target)) = (attachment.session_id(), attachment.target_id()) {
			self.send_frame(&notify::detached(session, target, reason));
		}
		if let Err(err) = self.backend.detach(page).await {
			debug!(target = "pw.relay", %page, error = %err, "backend detach failed");
		}
		info!(target = "pw.relay", %page, reason, "page detached");
		self.status.page_status(page, PageStatus::Off, "Detached");
		true
	}

	/// The backend dropped the attachment itself; clean up without calling
	/// back into it and without re-attaching.
	pub(crate) fn backend_detached(&self, page: PageId, reason: &str) -> bool {
		let Some(attachment) = self.registry.lock().unregister(page) else {
			return false;
		};
		if let (Some(session), Some(target)) = (attachment.session_id(), attachment.target_id()) {
			self.send_frame(&notify::detached(session, target, reason));
		}
		info!(target = "pw.relay", %page, reason, "backend detached page");
		self.status.page_status(page, PageStatus::Off, reason);
		true
	}

	/// Attaches every eligible page that is not already tracked.
	///
	/// Stops at the first connect failure; other attach failures are skipped.
	pub async fn attach_all_eligible(self: &Arc<Self>) -> Result<usize> {
		let pages = self.host.list_pages().await?;
		let mut attached = 0;
		for page in pages.into_iter().filter(|p| is_eligible(&p.url)) {
			if self.registry.lock().contains(page.id) {
				continue;
			}
			match self.attach_page(page.id, Trigger::Automatic).await {
				Ok(AttachOutcome::Attached { .. }) => attached += 1,
				Ok(AttachOutcome::AlreadyTracked) => {}
				Err(err) if err.is_connect() => return Err(err),
				Err(_) => {}
			}
		}
		debug!(target = "pw.relay", attached, "eligibility sweep done");
		Ok(attached)
	}

	/// Connect, then sweep. A connect failure arms the reconnect timer.
	pub(crate) async fn sweep(self: &Arc<Self>) -> Result<usize> {
		if let Err(err) = self.ensure_connected().await {
			if self.always_on() {
				self.schedule_reconnect();
			}
			return Err(err.into());
		}
		self.attach_all_eligible().await
	}
}
