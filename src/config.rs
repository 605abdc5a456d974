//! Environment-sourced configuration, read once at process start.

use std::time::Duration;

use color_eyre::{Result, eyre::bail};

/// Quiz deadline: a chain is abandoned once this much wall-clock time has elapsed.
pub const QUIZ_DEADLINE: Duration = Duration::from_secs(180);

/// Maximum accepted/emitted JSON payload size (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Per-navigation render timeout.
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Settle interval after navigation, for late-firing dynamic content.
pub const SETTLE_INTERVAL: Duration = Duration::from_secs(2);

/// Max solve+submit attempts per quiz page.
pub const MAX_RETRIES: u32 = 3;

#[derive(Clone, Debug)]
pub struct Config {
	/// Expected student email; mismatching requests are logged but still served
	pub email: String,
	/// Shared secret; requests carrying anything else are rejected
	pub secret: String,
	pub openai_api_key: String,
	pub openai_base_url: String,
	pub openai_model: String,
	/// Chart rendering backend (QuickChart-compatible)
	pub chart_backend_url: String,
	pub host: String,
	pub port: u16,
}

impl Config {
	/// Read and validate configuration from the environment. Called once in main;
	/// values are never re-read during execution.
	pub fn from_env() -> Result<Self> {
		let email = std::env::var("EMAIL").unwrap_or_default();
		let secret = std::env::var("SECRET").unwrap_or_default();
		if secret.is_empty() {
			bail!("SECRET must be set");
		}
		if email.is_empty() {
			bail!("EMAIL must be set");
		}

		let openai_api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
		if openai_api_key.is_empty() {
			tracing::warn!("OPENAI_API_KEY not set; answer generation will fail");
		}
		let openai_base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
		let openai_model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4-turbo-preview".into());
		let chart_backend_url = std::env::var("CHART_BACKEND_URL").unwrap_or_else(|_| "https://quickchart.io/chart".into());

		let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
		let port = match std::env::var("PORT") {
			Ok(p) => match p.parse::<u16>() {
				Ok(port) => port,
				Err(e) => bail!("PORT is not a valid port number: {e}"),
			},
			Err(_) => 8000,
		};

		Ok(Self {
			email,
			secret,
			openai_api_key,
			openai_base_url,
			openai_model,
			chart_backend_url,
			host,
			port,
		})
	}
}
