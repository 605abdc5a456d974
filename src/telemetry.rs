//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! - LOG_LEVEL controls the filter (e.g. "debug" or full directives).
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
	let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info,quiz_agent=debug,tower_http=info,axum=info"));

	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

	match std::env::var("LOG_FORMAT").as_deref() {
		Ok("json") => {
			builder.json().init();
		}
		_ => {
			builder.init();
		}
	}
}
