//! Builders for the notifications the relay emits upstream.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::frame::{Notification, PageId};
use crate::{ATTACHED_TO_TARGET, DETACHED_FROM_TARGET, FORWARD_CDP_EVENT, PONG, TAB_INVENTORY, TAB_LIFECYCLE};

/// Wrap a debugging-protocol event for the control plane.
pub fn forward_event(method: &str, params: Value, session_id: Option<&str>) -> Notification {
	Notification::new(
		FORWARD_CDP_EVENT,
		json!({
			"method": method,
			"params": params,
			"sessionId": session_id,
		}),
	)
}

/// The `attached` announcement for a top-level session.
///
/// `target_info` is whatever the debugging backend reported; `attached` is
/// forced to true.
pub fn attached(session_id: &str, mut target_info: Value) -> Notification {
	if let Some(obj) = target_info.as_object_mut() {
		obj.insert("attached".to_string(), Value::Bool(true));
	}
	forward_event(
		ATTACHED_TO_TARGET,
		json!({
			"sessionId": session_id,
			"targetInfo": target_info,
			"waitingForDebugger": false,
		}),
		None,
	)
}

pub fn detached(session_id: &str, target_id: &str, reason: &str) -> Notification {
	forward_event(
		DETACHED_FROM_TARGET,
		json!({
			"sessionId": session_id,
			"targetId": target_id,
			"reason": reason,
		}),
		None,
	)
}

pub fn pong() -> Notification {
	Notification::new(PONG, Value::Null)
}

/// One attached page as reported in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
	pub page_id: PageId,
	pub session_id: String,
	pub target_id: String,
}

pub fn inventory(tabs: &[InventoryEntry]) -> Notification {
	Notification::new(TAB_INVENTORY, json!({ "tabs": tabs }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabEvent {
	Created,
	Removed,
	Updated,
	Navigated,
}

/// Page lifecycle change, carrying minimal metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabLifecycle {
	pub event: TabEvent,
	pub page_id: PageId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
}

impl TabLifecycle {
	pub fn into_notification(self) -> Notification {
		let params = serde_json::to_value(&self).unwrap_or(Value::Null);
		Notification::new(TAB_LIFECYCLE, params)
	}
}
