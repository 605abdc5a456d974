//! Extraction of quiz instructions and submit URLs from rendered pages.

use base64::Engine;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Patterns tried against a script body to isolate a base64 payload inside an
/// `atob(...)` call, most specific quoting first.
const ATOB_PATTERNS: [&str; 3] = [
	r"(?s)atob\(`([^`]+)`\)",
	r#"(?s)atob\(["']([^"']+)["']\)"#,
	r#"(?s)atob\(\s*["']([^"']+)["']\s*\)"#,
];

/// Submit-URL pattern cascade, tried in order; the first pattern with any
/// match wins.
const URL_PATTERNS: [&str; 5] = [
	r#"(?i)post.*?to\s+(https?://[^\s<>"')]+)"#,
	r#"(?i)submit.*?to\s+(https?://[^\s<>"')]+)"#,
	r#"(?i)post.*?your.*?answer.*?to\s+(https?://[^\s<>"')]+)"#,
	r#"(?i)(https?://[^\s<>"')]*submit[^\s<>"')]*)"#,
	r#"(?i)https?://[^\s<>"')]+"#,
];

fn joined_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
	parts.map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n")
}

fn element_text(el: ElementRef) -> String {
	joined_text(el.text())
}

fn fragment_text(html: &str) -> String {
	let fragment = Html::parse_fragment(html);
	joined_text(fragment.root_element().text())
}

/// Locate the human-readable quiz instructions in rendered HTML.
///
/// Tries, in order: the `div#result` container's decoded inner markup, a
/// base64 payload embedded in an inline `atob(...)` call, the container's
/// plain text, and finally the text of the whole page. Returns `None` only
/// when every step yields nothing.
pub fn extract_instructions(html: &str) -> Option<String> {
	let doc = Html::parse_document(html);
	let result_sel = Selector::parse("div#result").ok()?;
	let script_sel = Selector::parse("script").ok()?;

	// 1. Rendered content inside the result container
	let result_div = doc.select(&result_sel).next();
	if let Some(div) = result_div {
		if !element_text(div).is_empty() {
			let inner = div.inner_html();
			if !inner.trim().is_empty() {
				let text = fragment_text(&inner);
				if !text.is_empty() {
					return Some(text);
				}
			}
		}
	}

	// 2. Base64-obfuscated payload inside an inline script. A bad match or a
	// bad decode skips to the next candidate, never aborts the extraction.
	for script in doc.select(&script_sel) {
		let body: String = script.text().collect();
		if !body.contains("atob") {
			continue;
		}
		for pattern in ATOB_PATTERNS {
			let Ok(re) = Regex::new(pattern) else { continue };
			let Some(captures) = re.captures(&body) else { continue };
			let Some(payload) = captures.get(1) else { continue };

			let cleaned: String = payload.as_str().chars().filter(|c| !c.is_whitespace()).collect();
			let decoded = match base64::engine::general_purpose::STANDARD.decode(cleaned.as_bytes()) {
				Ok(bytes) => bytes,
				Err(e) => {
					tracing::warn!("error decoding base64 payload: {e}");
					continue;
				}
			};
			let Ok(decoded_html) = String::from_utf8(decoded) else {
				tracing::warn!("base64 payload is not valid utf-8");
				continue;
			};
			let text = fragment_text(&decoded_html);
			if !text.is_empty() {
				return Some(text);
			}
		}
	}

	// 3. Result container's plain text
	if let Some(div) = result_div {
		let text = element_text(div);
		if !text.is_empty() {
			return Some(text);
		}
	}

	// 4. Last resort: the whole page
	let text = joined_text(doc.root_element().text());
	if text.is_empty() { None } else { Some(text) }
}

/// Find the URL the answer must be POSTed to in free-text instructions.
///
/// Among the matches of the first successful pattern, a URL containing
/// "submit" is preferred over positional order. Trailing punctuation is
/// stripped from the chosen URL.
pub fn extract_submit_url(instructions: &str) -> Option<String> {
	for pattern in URL_PATTERNS {
		let Ok(re) = Regex::new(pattern) else { continue };
		let matches: Vec<&str> = re
			.captures_iter(instructions)
			.filter_map(|c| c.get(1).or_else(|| c.get(0)).map(|m| m.as_str()))
			.collect();
		if matches.is_empty() {
			continue;
		}
		let chosen = matches.iter().find(|m| m.to_lowercase().contains("submit")).unwrap_or(&matches[0]);
		return Some(strip_trailing_punctuation(chosen));
	}
	tracing::warn!("could not extract submit url from instructions");
	None
}

fn strip_trailing_punctuation(url: &str) -> String {
	url.trim_end_matches(['.', ',', ';', ':', '!', '?', ')']).to_string()
}

#[cfg(test)]
mod tests {
	use base64::Engine;

	use super::*;

	#[test]
	fn instructions_from_result_div() {
		let html = r#"<html><body><div id="result"><p>Count the rows.</p><p>Post your answer to https://x/submit</p></div></body></html>"#;
		let text = extract_instructions(html).expect("instructions");
		assert!(text.contains("Count the rows."));
		assert!(text.contains("Post your answer to https://x/submit"));
	}

	#[test]
	fn instructions_from_base64_script_backticks() {
		let fragment = "<h1>Quiz</h1><p>Post the total to https://q.example/submit</p>";
		let encoded = base64::engine::general_purpose::STANDARD.encode(fragment);
		let html = format!(r#"<html><body><div id="result"></div><script>document.getElementById("result").innerHTML = atob(`{encoded}`);</script></body></html>"#);
		let text = extract_instructions(&html).expect("instructions");
		assert!(text.contains("Quiz"));
		assert!(text.contains("https://q.example/submit"));
	}

	#[test]
	fn instructions_from_base64_script_quoted() {
		let fragment = "<p>Answer true or false.</p>";
		let encoded = base64::engine::general_purpose::STANDARD.encode(fragment);
		let html = format!(r#"<html><body><script>var x = atob("{encoded}");</script></body></html>"#);
		assert_eq!(extract_instructions(&html).expect("instructions"), "Answer true or false.");
	}

	#[test]
	fn base64_payload_with_embedded_newlines() {
		let fragment = "<p>Sum the column.</p>";
		let mut encoded = base64::engine::general_purpose::STANDARD.encode(fragment);
		encoded.insert(8, '\n');
		let html = format!("<html><body><script>render(atob(`{encoded}`));</script></body></html>");
		assert_eq!(extract_instructions(&html).expect("instructions"), "Sum the column.");
	}

	#[test]
	fn bad_base64_falls_through_to_page_text() {
		let html = r#"<html><body><script>var x = atob("!!!not-base64!!!");</script><p>Visible fallback text</p></body></html>"#;
		let text = extract_instructions(html).expect("instructions");
		assert!(text.contains("Visible fallback text"));
	}

	#[test]
	fn whole_page_fallback() {
		let html = "<html><body><main><p>Plain page body</p></main></body></html>";
		assert_eq!(extract_instructions(html).expect("instructions"), "Plain page body");
	}

	#[test]
	fn empty_page_yields_none() {
		assert_eq!(extract_instructions("<html><body></body></html>"), None);
	}

	#[test]
	fn submit_url_from_post_phrase() {
		let url = extract_submit_url("Post your answer to https://quiz.example.com/api/submit when done.");
		assert_eq!(url.as_deref(), Some("https://quiz.example.com/api/submit"));
	}

	#[test]
	fn submit_url_trailing_punctuation_stripped() {
		let url = extract_submit_url("submit the result to https://quiz.example.com/check.");
		assert_eq!(url.as_deref(), Some("https://quiz.example.com/check"));
	}

	#[test]
	fn submit_url_prefers_submit_over_position() {
		let text = "Post the file to https://quiz.example.com/upload. Then post your answer to https://quiz.example.com/submit";
		// Both phrases match the same pattern; the URL containing "submit" wins.
		let url = extract_submit_url(text);
		assert_eq!(url.as_deref(), Some("https://quiz.example.com/submit"));
	}

	#[test]
	fn bare_url_fallback() {
		let url = extract_submit_url("All details at https://quiz.example.com/page42");
		assert_eq!(url.as_deref(), Some("https://quiz.example.com/page42"));
	}

	#[test]
	fn no_url_yields_none() {
		assert_eq!(extract_submit_url("There is no address in this text."), None);
	}
}
