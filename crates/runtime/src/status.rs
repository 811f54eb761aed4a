//! Presentation signals: per-page badge state and one-shot prompts.

use std::fmt;

use pw_relay_protocol::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
	Off,
	Connecting,
	On,
	/// Presentation only: the page is still registered but the control plane
	/// dropped.
	Reconnecting,
	Error,
}

impl PageStatus {
	/// Short badge text.
	pub fn badge(self) -> &'static str {
		match self {
			PageStatus::Off => "",
			PageStatus::Connecting | PageStatus::Reconnecting => "...",
			PageStatus::On => "ON",
			PageStatus::Error => "ERR",
		}
	}
}

impl fmt::Display for PageStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			PageStatus::Off => "off",
			PageStatus::Connecting => "connecting",
			PageStatus::On => "on",
			PageStatus::Reconnecting => "reconnecting",
			PageStatus::Error => "error",
		};
		f.write_str(name)
	}
}

/// Receives presentation updates. Implementations must not block.
pub trait StatusSink: Send + Sync {
	fn page_status(&self, page: PageId, status: PageStatus, description: &str);

	/// Offer setup help after a failed explicit action. The relay calls this
	/// at most once per process; implementations persist whether it was ever
	/// shown.
	fn first_error_help(&self);

	/// The control plane came back after a previous successful connection.
	fn reconnected(&self);
}
