//! Headless browser rendering behind a process-wide singleton.
//!
//! The browser engine is launched lazily on first use, under a lock so that
//! concurrent first-callers cannot race to start two instances. Each render
//! opens its own page, so page-level work needs no cross-task locking.

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use color_eyre::{Result, eyre::eyre};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::SETTLE_INTERVAL;

/// Fully-rendered page content, captured in a single visit.
#[derive(Clone, Debug)]
pub struct Rendered {
	pub html: String,
	pub text: String,
}

struct BrowserHandle {
	browser: Browser,
	event_task: JoinHandle<()>,
}

static BROWSER: Mutex<Option<BrowserHandle>> = Mutex::const_new(None);

async fn launch_browser() -> Result<BrowserHandle> {
	let config = BrowserConfig::builder()
		.args(vec!["--no-sandbox", "--disable-setuid-sandbox"])
		.build()
		.map_err(|e| eyre!("Failed to build browser config: {e}"))?;

	let (browser, mut handler) = Browser::launch(config).await.map_err(|e| eyre!("Failed to launch browser: {e}"))?;

	// Drain CDP events so the browser doesn't hang
	let event_task = tokio::spawn(async move {
		while let Some(_event) = handler.next().await {}
	});

	tracing::info!("browser initialized");
	Ok(BrowserHandle { browser, event_task })
}

/// Open a fresh page on the shared browser instance, launching it first if needed.
async fn acquire_page() -> Result<Page> {
	let mut guard = BROWSER.lock().await;
	if guard.is_none() {
		*guard = Some(launch_browser().await?);
	}
	let Some(handle) = guard.as_ref() else {
		return Err(eyre!("browser initialization raced"));
	};
	let page = handle.browser.new_page("about:blank").await.map_err(|e| eyre!("Failed to create new page: {e}"))?;
	Ok(page)
}

/// Navigate to `url` and return the rendered HTML plus the page's visible text.
///
/// Navigation is bounded by `timeout`; on timeout the partially-loaded page is
/// still read best-effort, and only a failed read is an error. The page is
/// released on every exit path.
pub async fn render(url: &str, timeout: Duration) -> Result<Rendered> {
	let page = acquire_page().await?;
	let result = render_on(&page, url, timeout).await;
	if let Err(e) = page.close().await {
		tracing::debug!("failed to close page: {e}");
	}
	result
}

async fn render_on(page: &Page, url: &str, timeout: Duration) -> Result<Rendered> {
	tracing::info!(%url, "navigating");
	match tokio::time::timeout(timeout, navigate(page, url)).await {
		Ok(Ok(())) => {
			// Let late-firing dynamic content settle before reading
			tokio::time::sleep(SETTLE_INTERVAL).await;
			let rendered = extract_content(page).await?;
			tracing::info!(chars = rendered.html.len(), "page loaded");
			Ok(rendered)
		}
		Ok(Err(e)) => Err(e),
		Err(_) => {
			tracing::warn!(%url, "navigation timed out, attempting best-effort extraction");
			extract_content(page).await
		}
	}
}

async fn navigate(page: &Page, url: &str) -> Result<()> {
	page.goto(url).await.map_err(|e| eyre!("Failed to navigate: {e}"))?;
	page.wait_for_navigation().await.map_err(|e| eyre!("Failed waiting for navigation: {e}"))?;
	Ok(())
}

async fn extract_content(page: &Page) -> Result<Rendered> {
	let html = page.content().await.map_err(|e| eyre!("Failed to get page content: {e}"))?;
	let text = page
		.evaluate("document.body ? document.body.innerText : ''")
		.await
		.map_err(|e| eyre!("Failed to get page text: {e}"))?
		.value()
		.and_then(|v| v.as_str())
		.unwrap_or_default()
		.to_string();
	Ok(Rendered { html, text })
}

/// Close the browser engine and its event task. Safe to call when never initialized.
pub async fn shutdown() {
	let mut guard = BROWSER.lock().await;
	if let Some(mut handle) = guard.take() {
		if let Err(e) = handle.browser.close().await {
			tracing::warn!("Failed to close browser: {e}");
		}
		handle.event_task.abort();
		tracing::info!("browser closed");
	}
}
