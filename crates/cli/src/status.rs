//! File-backed status board: the console's view of per-page state.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use parking_lot::Mutex;
use pw_relay_runtime::{PageId, PageStatus, StatusSink};
use serde::Serialize;
use tracing::{info, warn};

const HELP_MARKER: &str = "help-shown";

const HELP_TEXT: &str = "\
pw-relay could not reach the control plane.

  - Start the control plane (it listens on the relay port, 19988 by default).
  - Or point the relay elsewhere with --host / --port.

This message is shown only once.";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageEntry {
	pub page_id: PageId,
	pub status: String,
	pub badge: &'static str,
	pub description: String,
}

#[derive(Debug, Default)]
struct Board {
	pages: BTreeMap<PageId, PageEntry>,
	reconnects: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BoardFile<'a> {
	pages: Vec<&'a PageEntry>,
	reconnects: u64,
}

enum WriterMsg {
	Save(Vec<u8>),
	Flush(mpsc::Sender<()>),
}

/// Persists page statuses to `state_file` and shows the first-error help at
/// most once per marker file.
///
/// File writes happen on a dedicated thread in submission order, so status
/// updates never block the caller.
pub struct StatusBoard {
	state_file: PathBuf,
	help_marker: PathBuf,
	board: Mutex<Board>,
	writer: mpsc::Sender<WriterMsg>,
}

impl StatusBoard {
	pub fn new(state_file: PathBuf) -> Self {
		let help_marker = state_file
			.parent()
			.map(|dir| dir.join(HELP_MARKER))
			.unwrap_or_else(|| PathBuf::from(HELP_MARKER));
		let (writer, queue) = mpsc::channel();
		let path = state_file.clone();
		thread::spawn(move || write_loop(&path, queue));
		Self {
			state_file,
			help_marker,
			board: Mutex::new(Board::default()),
			writer,
		}
	}

	/// `<data dir>/pw-relay/status.json`, or the temp dir when the platform
	/// has no data directory.
	pub fn default_path() -> PathBuf {
		dirs::data_local_dir()
			.unwrap_or_else(std::env::temp_dir)
			.join("pw-relay")
			.join("status.json")
	}

	pub fn state_file(&self) -> &Path {
		&self.state_file
	}

	pub fn entries(&self) -> Vec<PageEntry> {
		self.board.lock().pages.values().cloned().collect()
	}

	/// Claims the one-time help prompt. True only the first time ever.
	pub fn claim_help(&self) -> io::Result<bool> {
		if let Some(dir) = self.help_marker.parent() {
			fs::create_dir_all(dir)?;
		}
		match fs::OpenOptions::new().write(true).create_new(true).open(&self.help_marker) {
			Ok(_) => Ok(true),
			Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
			Err(err) => Err(err),
		}
	}

	/// Blocks until every queued write has reached the file.
	pub fn flush(&self) {
		let (done, wait) = mpsc::channel();
		if self.writer.send(WriterMsg::Flush(done)).is_ok() {
			let _ = wait.recv();
		}
	}

	/// Queues a snapshot of `board`. Called under the board lock so the
	/// queue order matches the update order.
	fn save(&self, board: &Board) {
		let file = BoardFile {
			pages: board.pages.values().collect(),
			reconnects: board.reconnects,
		};
		match serde_json::to_vec_pretty(&file) {
			Ok(json) => {
				if self.writer.send(WriterMsg::Save(json)).is_err() {
					warn!(target = "pw.relay", "status writer stopped");
				}
			}
			Err(err) => warn!(target = "pw.relay", error = %err, "cannot encode status file"),
		}
	}
}

fn write_loop(path: &Path, queue: mpsc::Receiver<WriterMsg>) {
	while let Ok(msg) = queue.recv() {
		match msg {
			WriterMsg::Save(mut json) => {
				// Only the newest snapshot matters.
				let mut flushes = Vec::new();
				while let Ok(next) = queue.try_recv() {
					match next {
						WriterMsg::Save(newer) => json = newer,
						WriterMsg::Flush(done) => {
							flushes.push(done);
							break;
						}
					}
				}
				if let Err(err) = persist(path, &json) {
					warn!(target = "pw.relay", path = %path.display(), error = %err, "cannot write status file");
				}
				for done in flushes {
					let _ = done.send(());
				}
			}
			WriterMsg::Flush(done) => {
				let _ = done.send(());
			}
		}
	}
}

fn persist(path: &Path, json: &[u8]) -> io::Result<()> {
	if let Some(dir) = path.parent() {
		fs::create_dir_all(dir)?;
	}
	let tmp = path.with_extension("json.tmp");
	fs::write(&tmp, json)?;
	fs::rename(&tmp, path)
}

impl StatusSink for StatusBoard {
	fn page_status(&self, page: PageId, status: PageStatus, description: &str) {
		info!(target = "pw.relay", %page, %status, description, "page status");
		let mut board = self.board.lock();
		if status == PageStatus::Off {
			board.pages.remove(&page);
		} else {
			board.pages.insert(
				page,
				PageEntry {
					page_id: page,
					status: status.to_string(),
					badge: status.badge(),
					description: description.to_string(),
				},
			);
		}
		self.save(&board);
	}

	fn first_error_help(&self) {
		match self.claim_help() {
			Ok(true) => eprintln!("{HELP_TEXT}"),
			Ok(false) => {}
			Err(err) => warn!(target = "pw.relay", error = %err, "cannot record help marker"),
		}
	}

	fn reconnected(&self) {
		info!(target = "pw.relay", "reconnected to control plane");
		let mut board = self.board.lock();
		board.reconnects += 1;
		self.save(&board);
	}
}
