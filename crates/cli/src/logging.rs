use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

fn default_filter(verbosity: u8) -> &'static str {
	// Relay events all log under the `pw.relay` target.
	// 0 = warnings only
	// 1 (-v) = relay info: attach/detach, reconnects, page status
	// 2 (-vv) = relay debug: routing, dropped frames, retries
	// 3+ = debug for dependencies too (HTTP, WebSocket)
	match verbosity {
		0 => "warn",
		1 => "warn,pw.relay=info",
		2 => "warn,pw.relay=debug",
		_ => "debug",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
