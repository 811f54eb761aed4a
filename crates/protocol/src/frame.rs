//! Frame shapes exchanged with the control plane.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque local handle for a page (browser tab or equivalent surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Correlated request. The relay both issues these and receives them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	pub id: u64,
	pub method: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub params: Value,
}

/// Answer to a [`Request`], matched strictly by `id`.
///
/// The relay always writes `error` as a plain string. Inbound errors are kept
/// as raw JSON because some control planes send `{ "message": .. }` objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub id: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<Value>,
}

impl Response {
	pub fn ok(id: u64, result: Value) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn err(id: u64, message: impl Into<String>) -> Self {
		Self {
			id,
			result: None,
			error: Some(Value::String(message.into())),
		}
	}

	/// Human-readable error text, if this response is a failure.
	pub fn error_message(&self) -> Option<String> {
		let error = self.error.as_ref()?;
		Some(match error {
			Value::String(s) => s.clone(),
			Value::Object(obj) => obj
				.get("message")
				.and_then(Value::as_str)
				.map(str::to_owned)
				.unwrap_or_else(|| error.to_string()),
			other => other.to_string(),
		})
	}
}

/// One-way message without an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	pub method: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub params: Value,
}

impl Notification {
	pub fn new(method: impl Into<String>, params: Value) -> Self {
		Self {
			method: method.into(),
			params,
		}
	}
}

/// Any inbound frame.
///
/// Variant order matters for untagged decoding: a request carries both `id`
/// and `method`, a response only `id`, a notification only `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
	Request(Request),
	Response(Response),
	Notification(Notification),
	/// Forward-compatible catch-all.
	Unknown(Value),
}

impl Frame {
	pub fn parse(raw: &str) -> serde_json::Result<Self> {
		serde_json::from_str(raw)
	}
}

/// Params of a `forwardCDPCommand` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardParams {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_id: Option<String>,
}

impl ForwardParams {
	/// Explicit target id: the request's own `targetId`, else one inside the
	/// command params.
	pub fn explicit_target_id(&self) -> Option<&str> {
		self.target_id
			.as_deref()
			.or_else(|| self.params.get("targetId").and_then(Value::as_str))
	}
}
