//! Inbound `forwardCDPCommand` handling: resolve the page, apply the
//! command-specific behaviour, forward the rest verbatim.

use std::sync::Arc;

use pw_relay_protocol::{FORWARD_CDP_COMMAND, ForwardParams, PageId, Request, Response};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::lifecycle::{AttachOutcome, Trigger};
use crate::registry::Route;
use crate::relay::Relay;

/// Domains whose `.enable` is preceded by `.disable` so the backend replays
/// state it would otherwise treat as already sent.
const RESYNC_ON_ENABLE: &[&str] = &["Runtime"];

const CREATE_TARGET: &str = "Target.createTarget";
const CLOSE_TARGET: &str = "Target.closeTarget";
const ACTIVATE_TARGET: &str = "Target.activateTarget";

const BLANK_PAGE: &str = "about:blank";

impl Relay {
	/// Answers one inbound request on the connection it arrived on.
	pub(crate) async fn handle_request(self: Arc<Self>, epoch: u64, request: Request) {
		let id = request.id;
		let result = if request.method == FORWARD_CDP_COMMAND {
			match serde_json::from_value::<ForwardParams>(request.params) {
				Ok(forward) => self.route_command(forward).await,
				Err(err) => Err(Error::Protocol(format!("bad forwardCDPCommand params: {err}"))),
			}
		} else {
			Err(Error::Protocol(format!("unknown method {}", request.method)))
		};

		let response = match result {
			Ok(value) => Response::ok(id, value),
			Err(err) => {
				debug!(target = "pw.relay", id, error = %err, "command failed");
				Response::err(id, err.to_string())
			}
		};
		self.respond(epoch, response);
	}

	/// Executes a forwarded command and returns its result.
	pub async fn route_command(self: &Arc<Self>, forward: ForwardParams) -> Result<Value> {
		match forward.method.as_str() {
			CREATE_TARGET => return self.create_surface(&forward).await,
			CLOSE_TARGET => return self.close_surface(&forward).await,
			ACTIVATE_TARGET => return self.activate_surface(&forward).await,
			_ => {}
		}

		let route = self.resolve_route(&forward)?;
		// Only a session other than the page's own routes into a child.
		let child = forward
			.session_id
			.as_deref()
			.filter(|s| *s != route.session_id);
		debug!(target = "pw.relay", page = %route.page, method = %forward.method, child, "forwarding command");

		if let Some(domain) = forward.method.strip_suffix(".enable") {
			if RESYNC_ON_ENABLE.contains(&domain) {
				let disable = format!("{domain}.disable");
				if let Err(err) = self.backend.send_command(route.page, &disable, json!({}), child).await {
					debug!(target = "pw.relay", page = %route.page, error = %err, "disable before re-enable failed");
				}
				tokio::time::sleep(self.config.settle.reenable).await;
			}
		}

		Ok(self
			.backend
			.send_command(route.page, &forward.method, forward.params, child)
			.await?)
	}

	fn resolve_route(&self, forward: &ForwardParams) -> Result<Route> {
		self.registry
			.lock()
			.resolve(forward.session_id.as_deref(), forward.explicit_target_id())
			.ok_or_else(|| Error::NoTarget(forward.method.clone()))
	}

	/// The explicit target's page; without a target id, the command's
	/// implicit page. An unknown target id never falls back to another page.
	fn resolve_page(&self, forward: &ForwardParams) -> Option<PageId> {
		let registry = self.registry.lock();
		match forward.explicit_target_id() {
			Some(target) => registry.lookup_by_target(target),
			None => registry
				.resolve(forward.session_id.as_deref(), None)
				.map(|route| route.page),
		}
	}

	async fn create_surface(self: &Arc<Self>, forward: &ForwardParams) -> Result<Value> {
		let url = forward
			.params
			.get("url")
			.and_then(Value::as_str)
			.filter(|u| !u.is_empty())
			.unwrap_or(BLANK_PAGE);
		let page = self.host.create_page(url).await?;
		debug!(target = "pw.relay", %page, url, "created page for control plane");
		tokio::time::sleep(self.config.settle.create_target).await;

		let target_id = match self.attach_page(page, Trigger::Explicit).await? {
			AttachOutcome::Attached { target_id, .. } => target_id,
			AttachOutcome::AlreadyTracked => self
				.target_of(page)
				.ok_or_else(|| Error::AttachFailed {
					page,
					reason: "page is still attaching".to_string(),
				})?,
		};
		Ok(json!({ "targetId": target_id }))
	}

	fn target_of(&self, page: PageId) -> Option<String> {
		self.registry
			.lock()
			.get(page)
			.and_then(|a| a.target_id().map(str::to_owned))
	}

	async fn close_surface(&self, forward: &ForwardParams) -> Result<Value> {
		let Some(page) = self.resolve_page(forward) else {
			return Ok(json!({ "success": false }));
		};
		self.detach(page, "target closed").await;
		let success = match self.host.close_page(page).await {
			Ok(()) => true,
			Err(err) => {
				debug!(target = "pw.relay", %page, error = %err, "close failed");
				false
			}
		};
		Ok(json!({ "success": success }))
	}

	/// Best effort: a vanished page is still an empty success.
	async fn activate_surface(&self, forward: &ForwardParams) -> Result<Value> {
		if let Some(page) = self.resolve_page(forward) {
			if let Err(err) = self.host.activate_page(page).await {
				debug!(target = "pw.relay", %page, error = %err, "activate failed");
			}
		}
		Ok(json!({}))
	}
}
