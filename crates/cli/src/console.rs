//! Line-oriented stdin console for toggling pages by hand.

use std::str::FromStr;
use std::sync::Arc;

use pw_relay_runtime::{AttachOutcome, PageId, Relay, RelaySnapshot};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::status::{PageEntry, StatusBoard};

pub const HELP: &str = "commands: on | off | toggle <page> | attach <page> | detach <page> | status | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
	AlwaysOn(bool),
	Toggle(PageId),
	Attach(PageId),
	Detach(PageId),
	Status,
	Help,
	Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("unknown command `{0}`")]
	Unknown(String),

	#[error("`{0}` needs a page id")]
	MissingPage(&'static str),

	#[error("invalid page id `{0}`")]
	BadPage(String),

	#[error("`{0}` takes no arguments")]
	Unexpected(&'static str),
}

impl FromStr for Command {
	type Err = ParseError;

	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let mut words = line.split_whitespace();
		let Some(verb) = words.next() else {
			return Err(ParseError::Unknown(String::new()));
		};
		let verb = verb.to_ascii_lowercase();

		let command = match verb.as_str() {
			"on" => Command::AlwaysOn(true),
			"off" => Command::AlwaysOn(false),
			"status" | "ls" => Command::Status,
			"help" | "?" => Command::Help,
			"quit" | "exit" | "q" => Command::Quit,
			"toggle" => return page_arg("toggle", words.next()).map(Command::Toggle),
			"attach" => return page_arg("attach", words.next()).map(Command::Attach),
			"detach" => return page_arg("detach", words.next()).map(Command::Detach),
			_ => return Err(ParseError::Unknown(verb)),
		};
		if words.next().is_some() {
			let name = match command {
				Command::AlwaysOn(true) => "on",
				Command::AlwaysOn(false) => "off",
				Command::Status => "status",
				Command::Help => "help",
				_ => "quit",
			};
			return Err(ParseError::Unexpected(name));
		}
		Ok(command)
	}
}

fn page_arg(verb: &'static str, arg: Option<&str>) -> Result<PageId, ParseError> {
	let arg = arg.ok_or(ParseError::MissingPage(verb))?;
	arg.parse::<u64>()
		.map(PageId)
		.map_err(|_| ParseError::BadPage(arg.to_string()))
}

/// Runs one command, returning the text to show. `None` means quit.
pub async fn execute(relay: &Arc<Relay>, board: &StatusBoard, command: Command) -> Option<String> {
	let reply = match command {
		Command::Quit => return None,
		Command::Help => HELP.to_string(),
		Command::Status => render_status(&relay.snapshot(), &board.entries()),
		Command::AlwaysOn(on) => match relay.set_always_on(on).await {
			Ok(attached) if on => format!("always-on enabled, {attached} page(s) attached"),
			Ok(_) => "always-on disabled".to_string(),
			Err(err) => format!("always-on enabled, sweep failed: {err}"),
		},
		Command::Toggle(page) => match relay.toggle(page).await {
			Ok(true) => format!("page {page} attached"),
			Ok(false) => format!("page {page} detached"),
			Err(err) => format!("page {page}: {err}"),
		},
		Command::Attach(page) => match relay.attach(page).await {
			Ok(AttachOutcome::Attached { session_id, .. }) => format!("page {page} attached as {session_id}"),
			Ok(AttachOutcome::AlreadyTracked) => format!("page {page} is already attached"),
			Err(err) => format!("page {page}: {err}"),
		},
		Command::Detach(page) => {
			if relay.detach(page, "detached from console").await {
				format!("page {page} detached")
			} else {
				format!("page {page} was not attached")
			}
		}
	};
	Some(reply)
}

/// Human-readable form of a snapshot, with board descriptions when known.
pub fn render_status(snapshot: &RelaySnapshot, board: &[PageEntry]) -> String {
	let mut out = format!(
		"control plane: {}{}\nalways-on: {}\npending requests: {}\n",
		if snapshot.connected { "connected" } else { "disconnected" },
		if snapshot.reconnect_armed { " (reconnect scheduled)" } else { "" },
		if snapshot.always_on { "on" } else { "off" },
		snapshot.pending_requests,
	);
	if snapshot.attached.is_empty() && snapshot.connecting.is_empty() {
		out.push_str("no attached pages");
		return out;
	}
	for entry in &snapshot.attached {
		out.push_str(&format!("  page {} session {} target {}", entry.page_id, entry.session_id, entry.target_id));
		if let Some(board) = board.iter().find(|b| b.page_id == entry.page_id) {
			out.push_str(&format!(" [{}]", board.description));
		}
		out.push('\n');
	}
	for page in &snapshot.connecting {
		out.push_str(&format!("  page {page} connecting\n"));
	}
	if snapshot.child_sessions > 0 {
		out.push_str(&format!("child sessions: {}\n", snapshot.child_sessions));
	}
	out.trim_end().to_string()
}

/// Reads commands until `quit` or end of input.
pub async fn run<R>(relay: Arc<Relay>, board: Arc<StatusBoard>, input: R)
where
	R: AsyncBufRead + Unpin,
{
	let mut lines = input.lines();
	loop {
		let line = match lines.next_line().await {
			Ok(Some(line)) => line,
			Ok(None) => break,
			Err(err) => {
				debug!(target = "pw.relay", error = %err, "console input failed");
				break;
			}
		};
		if line.trim().is_empty() {
			continue;
		}
		match line.parse::<Command>() {
			Ok(command) => match execute(&relay, &board, command).await {
				Some(reply) => println!("{reply}"),
				None => break,
			},
			Err(err) => println!("{err}\n{HELP}"),
		}
	}
}
