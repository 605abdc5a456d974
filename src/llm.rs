//! Chat-completions client and the tool-calling answer engine.
//!
//! The engine drives a bounded conversation: the model may request tool
//! invocations, results are fed back as data, and the final free-text reply
//! is distilled into a typed [`Answer`]. Model failures never escape as
//! errors; the caller only ever sees `Some(answer)` or `None`.

use std::time::Duration;

use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	Answer,
	config::Config,
	tools::{self, ToolContext},
};

/// Hard cap on model round-trips per solve
const MAX_ROUNDS: usize = 10;

const SYSTEM_PROMPT: &str = "You are an expert data analyst and problem solver. Your task is to solve quizzes that involve:
- Web scraping and data sourcing
- Data preparation and cleansing
- Data analysis (filtering, sorting, aggregating, statistical analysis)
- Data visualization
- API interactions
- File processing (PDF, images, etc.)

You have access to tools for scraping, downloading files, processing data, analyzing, and visualizing.
Use these tools as needed to solve the quiz step by step.

Read the quiz instructions carefully and solve the problem.
Your final answer should be in the format requested (boolean, number, string, base64 URI, or JSON object).
Be precise and accurate.";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub function: FunctionCall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
	pub name: String,
	/// JSON-encoded arguments, exactly as the model produced them
	pub arguments: String,
}

#[derive(Clone, Debug, Serialize)]
struct ChatMessage {
	role: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	tool_calls: Option<Vec<ToolCall>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	tool_call_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	name: Option<String>,
}

impl ChatMessage {
	fn system(content: impl Into<String>) -> Self {
		Self { role: "system", content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
	}

	fn user(content: impl Into<String>) -> Self {
		Self { role: "user", content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
	}

	fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
		Self { role: "assistant", content, tool_calls: Some(tool_calls), tool_call_id: None, name: None }
	}

	/// Tool result, correlated back to the originating call
	fn tool(call_id: String, name: String, content: String) -> Self {
		Self { role: "tool", content: Some(content), tool_calls: None, tool_call_id: Some(call_id), name: Some(name) }
	}
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
	model: &'a str,
	messages: &'a [ChatMessage],
	tools: &'a Value,
	tool_choice: &'a str,
	temperature: f32,
	max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
	choices: Vec<Choice>,
	#[serde(default)]
	usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
	message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
	#[serde(default)]
	content: Option<String>,
	#[serde(default)]
	tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct Usage {
	prompt_tokens: Option<u64>,
	completion_tokens: Option<u64>,
	total_tokens: Option<u64>,
}

fn extract_api_error(body: &str) -> Option<String> {
	let value: Value = serde_json::from_str(body).ok()?;
	value.get("error")?.get("message")?.as_str().map(str::to_string)
}

pub struct LlmClient {
	client: reqwest::Client,
	api_key: String,
	base_url: String,
	model: String,
	tools: Value,
	tool_ctx: ToolContext,
}

impl LlmClient {
	pub fn new(config: &Config) -> Result<Self> {
		if config.openai_api_key.is_empty() {
			tracing::warn!("model API key not set");
		}
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(120))
			.build()
			.map_err(|e| eyre!("Failed to build http client: {e}"))?;
		let tool_ctx = ToolContext { http: client.clone(), chart_backend_url: config.chart_backend_url.clone() };
		Ok(Self {
			client,
			api_key: config.openai_api_key.clone(),
			base_url: config.openai_base_url.clone(),
			model: config.openai_model.clone(),
			tools: tools::tool_specs(),
			tool_ctx,
		})
	}

	async fn chat(&self, messages: &[ChatMessage]) -> Result<AssistantMessage> {
		let url = format!("{}/chat/completions", self.base_url);
		let req = ChatCompletionRequest {
			model: &self.model,
			messages,
			tools: &self.tools,
			tool_choice: "auto",
			temperature: 0.1,
			max_tokens: 2000,
		};

		let res = self
			.client
			.post(&url)
			.header(USER_AGENT, "quiz-agent/0.1")
			.header(CONTENT_TYPE, "application/json")
			.header(AUTHORIZATION, format!("Bearer {}", self.api_key))
			.json(&req)
			.send()
			.await
			.map_err(|e| eyre!("chat request failed: {e}"))?;

		if !res.status().is_success() {
			let status = res.status();
			let body = res.text().await.unwrap_or_default();
			let msg = extract_api_error(&body).unwrap_or(body);
			bail!("model API HTTP {status}: {msg}");
		}

		let body: ChatCompletionResponse = res.json().await.map_err(|e| eyre!("chat response decode failed: {e}"))?;
		if let Some(usage) = &body.usage {
			tracing::info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "model usage");
		}
		body.choices.into_iter().next().map(|c| c.message).ok_or_else(|| eyre!("model returned no choices"))
	}

	/// Drive a tool-calling conversation until the model produces a final
	/// answer or the round cap is reached. Never returns an error: model and
	/// transport failures are logged and collapse to `None`.
	pub async fn solve(&self, instructions: &str, quiz_url: &str) -> Option<Answer> {
		match self.run_conversation(instructions, quiz_url).await {
			Ok(answer) => answer,
			Err(e) => {
				tracing::error!("answer generation failed: {e}");
				None
			}
		}
	}

	async fn run_conversation(&self, instructions: &str, quiz_url: &str) -> Result<Option<Answer>> {
		let user_prompt = format!(
			"Quiz URL: {quiz_url}\n\nQuiz Instructions:\n{instructions}\n\n\
			Solve this quiz step by step using the available tools. The final answer should be:\n\
			- A boolean (true/false) if the question asks for yes/no\n\
			- A number (integer or float) if the question asks for a numeric value\n\
			- A string if the question asks for text\n\
			- A base64 URI (data:image/png;base64,...) if the question asks for an image/chart\n\
			- A JSON object if the question asks for structured data\n\n\
			When you have the final answer, provide it clearly."
		);
		let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

		for round in 1..=MAX_ROUNDS {
			tracing::debug!(round, "model round");
			let reply = self.chat(&messages).await?;

			let tool_calls = reply.tool_calls.unwrap_or_default();
			if !tool_calls.is_empty() {
				tracing::info!(count = tool_calls.len(), "model requested tool calls");
				messages.push(ChatMessage::assistant(reply.content, tool_calls.clone()));

				// Sequential dispatch; results appended in the order issued
				for call in tool_calls {
					let args: Value = serde_json::from_str(&call.function.arguments).map_err(|e| eyre!("invalid tool arguments: {e}"))?;
					tracing::info!(tool = %call.function.name, "dispatching tool");
					let result = tools::dispatch(&self.tool_ctx, &call.function.name, args).await;
					let content = serde_json::to_string(&result).map_err(|e| eyre!("tool result encode failed: {e}"))?;
					messages.push(ChatMessage::tool(call.id, call.function.name, content));
				}
				continue;
			}

			let text = reply.content.unwrap_or_default();
			let text = text.trim();
			if text.is_empty() {
				tracing::error!("model returned an empty final response");
				return Ok(None);
			}
			tracing::info!(response = %text, "model final response");
			return Ok(Some(extract_answer(text)));
		}

		tracing::error!("max rounds reached without a final answer");
		Ok(None)
	}
}

/// Distill a free-text model response into a typed answer.
///
/// Ordered cascade: last brace-delimited JSON object (one nesting level),
/// whole text as JSON, boolean keyword, first numeric literal, verbatim
/// string. Total over non-empty input.
pub fn extract_answer(text: &str) -> Answer {
	let trimmed = text.trim();

	// 1. Last balanced brace-delimited object
	if let Ok(re) = Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}") {
		if let Some(m) = re.find_iter(trimmed).last() {
			if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
				if let Some(answer) = Answer::from_json(value) {
					return answer;
				}
			}
		}
	}

	// 2. The whole text as JSON
	if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
		if let Some(answer) = Answer::from_json(value) {
			return answer;
		}
	}

	// 3. Boolean keyword, exact or embedded as a standalone word
	if trimmed.eq_ignore_ascii_case("true") {
		return Answer::Bool(true);
	}
	if trimmed.eq_ignore_ascii_case("false") {
		return Answer::Bool(false);
	}
	if let Ok(re) = Regex::new(r"(?i)\b(true|false)\b") {
		if let Some(m) = re.find(trimmed) {
			return Answer::Bool(m.as_str().eq_ignore_ascii_case("true"));
		}
	}

	// 4. First numeric literal
	if let Ok(re) = Regex::new(r"-?\d+\.?\d*") {
		if let Some(m) = re.find(trimmed) {
			let literal = m.as_str();
			if literal.contains('.') {
				if let Ok(f) = literal.parse::<f64>() {
					return Answer::Float(f);
				}
			} else if let Ok(i) = literal.parse::<i64>() {
				return Answer::Int(i);
			}
		}
	}

	// 5. Verbatim string
	Answer::Text(trimmed.to_string())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn boolean_keyword_exact() {
		assert_eq!(extract_answer("true"), Answer::Bool(true));
		assert_eq!(extract_answer("  False "), Answer::Bool(false));
	}

	#[test]
	fn boolean_keyword_in_sentence() {
		assert_eq!(extract_answer("The answer is true"), Answer::Bool(true));
		assert_eq!(extract_answer("That statement is FALSE."), Answer::Bool(false));
	}

	#[test]
	fn integer_literal() {
		assert_eq!(extract_answer("Result: 42"), Answer::Int(42));
		assert_eq!(extract_answer("-7 degrees"), Answer::Int(-7));
	}

	#[test]
	fn float_literal() {
		assert_eq!(extract_answer("Value is 3.14 units"), Answer::Float(3.14));
	}

	#[test]
	fn json_object() {
		assert_eq!(extract_answer(r#"{"x": 1}"#), Answer::Object(json!({"x": 1})));
	}

	#[test]
	fn last_json_object_wins() {
		let text = r#"First I considered {"draft": 1}, but the final result is {"total": 99, "meta": {"ok": true}}"#;
		assert_eq!(extract_answer(text), Answer::Object(json!({"total": 99, "meta": {"ok": true}})));
	}

	#[test]
	fn plain_string_fallback() {
		assert_eq!(extract_answer("hello world"), Answer::Text("hello world".into()));
	}

	#[test]
	fn object_roundtrip() {
		let original = json!({"count": 3, "label": "rows", "nested": {"a": 1}});
		let text = format!("The answer is {original}");
		assert_eq!(extract_answer(&text), Answer::Object(original));
	}

	#[test]
	fn whole_text_json_number() {
		assert_eq!(extract_answer("42"), Answer::Int(42));
		assert_eq!(extract_answer("2.5"), Answer::Float(2.5));
	}

	#[test]
	fn quoted_json_string() {
		assert_eq!(extract_answer(r#""paris""#), Answer::Text("paris".into()));
	}

	#[test]
	fn numeric_precedes_string_fallback() {
		assert_eq!(extract_answer("approximately 100 items"), Answer::Int(100));
	}
}
