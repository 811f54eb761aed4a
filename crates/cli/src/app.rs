//! Process wiring: Chrome backend, status board, control-plane link, relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pw_relay_runtime::{Relay, WebSocketConnector, event_channel};
use tokio::io::BufReader;
use tracing::info;

use crate::chrome::ChromeHost;
use crate::cli::Cli;
use crate::console;
use crate::status::StatusBoard;

pub async fn run(cli: Cli) -> Result<()> {
	let config = cli.relay_config();
	let (events, events_rx) = event_channel();

	let chrome = ChromeHost::new(cli.chrome.clone(), events).context("failed to set up DevTools client")?;
	let board = Arc::new(StatusBoard::new(cli.state_file.clone().unwrap_or_else(StatusBoard::default_path)));
	let connector = Arc::new(WebSocketConnector::new(&config));

	info!(
		target = "pw.relay",
		relay = %config.relay_url(),
		chrome = %cli.chrome,
		always_on = config.always_on,
		state_file = %board.state_file().display(),
		"starting relay"
	);

	let relay = Relay::new(config, chrome.clone(), chrome.clone(), board.clone(), connector);

	let poll_every = Duration::from_millis(cli.poll_interval_ms.max(100));
	let watcher = tokio::spawn(Arc::clone(&chrome).watch(poll_every));
	let events_loop = tokio::spawn(Arc::clone(&relay).run(events_rx));

	if cli.no_console {
		tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
	} else {
		println!("{}", console::HELP);
		let stdin = BufReader::new(tokio::io::stdin());
		tokio::select! {
			_ = console::run(Arc::clone(&relay), Arc::clone(&board), stdin) => {}
			signal = tokio::signal::ctrl_c() => {
				signal.context("failed to listen for ctrl-c")?;
			}
		}
	}

	info!(target = "pw.relay", "shutting down");
	relay.shutdown().await;
	watcher.abort();
	events_loop.abort();
	tokio::task::spawn_blocking(move || board.flush())
		.await
		.context("status writer did not finish")?;
	Ok(())
}
