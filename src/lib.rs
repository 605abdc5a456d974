use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod browser;
pub mod config;
pub mod extract;
pub mod llm;
pub mod server;
pub mod solver;
pub mod telemetry;
pub mod tools;

/// A validated quiz task, owned by exactly one solver run
#[derive(Clone, Debug)]
pub struct QuizTask {
	/// Entry URL of the quiz chain
	pub url: String,
	/// Student email, echoed into every submission
	pub email: String,
	/// Shared secret, echoed into every submission
	pub secret: String,
	/// When the validated request arrived (logging)
	pub created_at: DateTime<Utc>,
	/// Monotonic start instant; the chain deadline is measured from here
	pub started: Instant,
}

impl QuizTask {
	pub fn new(url: String, email: String, secret: String) -> Self {
		Self { url, email, secret, created_at: Utc::now(), started: Instant::now() }
	}
}

/// A typed quiz answer. Serialized untagged so the submission body carries the bare JSON value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Answer {
	Bool(bool),
	Int(i64),
	Float(f64),
	Text(String),
	Object(serde_json::Value),
}

impl Answer {
	/// Short type tag for logs
	pub fn type_name(&self) -> &'static str {
		match self {
			Answer::Bool(_) => "bool",
			Answer::Int(_) => "int",
			Answer::Float(_) => "float",
			Answer::Text(_) => "str",
			Answer::Object(_) => "object",
		}
	}

	/// Convert parsed JSON into a typed answer. `null` yields `None` so a bare
	/// "null" response falls through to the later extraction steps.
	pub fn from_json(value: serde_json::Value) -> Option<Self> {
		match value {
			serde_json::Value::Null => None,
			serde_json::Value::Bool(b) => Some(Answer::Bool(b)),
			serde_json::Value::Number(n) =>
				if let Some(i) = n.as_i64() {
					Some(Answer::Int(i))
				} else {
					n.as_f64().map(Answer::Float)
				},
			serde_json::Value::String(s) => Some(Answer::Text(s)),
			other => Some(Answer::Object(other)),
		}
	}
}

impl fmt::Display for Answer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Answer::Bool(b) => write!(f, "{b}"),
			Answer::Int(i) => write!(f, "{i}"),
			Answer::Float(x) => write!(f, "{x}"),
			Answer::Text(s) => write!(f, "{s}"),
			Answer::Object(v) => write!(f, "{v}"),
		}
	}
}

/// Structured correctness result returned by a submission endpoint
#[derive(Clone, Debug, Deserialize)]
pub struct Verdict {
	pub correct: bool,
	/// Next quiz URL, when the chain continues
	#[serde(default)]
	pub url: Option<String>,
	/// Failure explanation; logged, never used to adapt retries
	#[serde(default)]
	pub reason: Option<String>,
}
