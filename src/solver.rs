//! Quiz-chain orchestration: load a page, solve it, submit, follow the chain.
//!
//! State machine per page: LOADING (render + extract) → SOLVING/SUBMITTING
//! (bounded retries) → continue / retry / stop. A global wall-clock deadline
//! is re-checked between steps; it cannot interrupt an operation already in
//! flight, only refuse to start the next one.

use std::time::Duration;

use color_eyre::{Result, eyre::eyre};
use serde_json::json;

use crate::{
	Answer, QuizTask, Verdict, browser,
	config::{Config, MAX_PAYLOAD_SIZE, MAX_RETRIES, QUIZ_DEADLINE, RENDER_TIMEOUT},
	extract,
	llm::LlmClient,
};

pub struct QuizSolver {
	llm: LlmClient,
}

impl QuizSolver {
	pub fn new(config: &Config) -> Result<Self> {
		Ok(Self { llm: LlmClient::new(config)? })
	}

	/// Entry point for one detached task run. Never propagates: every failure
	/// is logged and terminates only this run.
	pub async fn solve_quiz(&self, task: QuizTask) {
		tracing::info!(url = %task.url, email = %task.email, created_at = %task.created_at, "starting quiz chain");
		if let Err(e) = self.run_chain(&task).await {
			tracing::error!(url = %task.url, "error in quiz solving workflow: {e}");
		}
	}

	async fn run_chain(&self, task: &QuizTask) -> Result<()> {
		// Submission client scoped to this run; released when the run ends
		let http = reqwest::Client::builder()
			.timeout(Duration::from_secs(60))
			.build()
			.map_err(|e| eyre!("Failed to build submission client: {e}"))?;

		let mut current_url = Some(task.url.clone());

		while let Some(url) = current_url.take() {
			if task.started.elapsed() > QUIZ_DEADLINE {
				tracing::error!(%url, elapsed = ?task.started.elapsed(), "quiz deadline exceeded, stopping chain");
				break;
			}

			tracing::info!(%url, "solving quiz");
			let Some(verdict) = self.solve_single_with_retry(&http, task, &url).await else {
				tracing::error!(%url, "failed to solve quiz, stopping chain");
				break;
			};

			if verdict.correct {
				tracing::info!("answer was correct");
				match verdict.url {
					Some(next) => {
						tracing::info!(%next, "moving to next quiz");
						current_url = Some(next);
					}
					None => tracing::info!("quiz chain completed"),
				}
			} else {
				tracing::warn!(reason = ?verdict.reason, "answer was incorrect");
				match verdict.url {
					Some(next) => {
						// Wrong but redirected: skip ahead without another attempt
						tracing::info!(%next, "received next url, skipping ahead");
						current_url = Some(next);
					}
					None => tracing::error!("no next url provided and answer was wrong"),
				}
			}
		}

		drop(http);
		Ok(())
	}

	/// Solve one quiz page with bounded retries. The page is rendered and
	/// parsed once; retries re-ask the model from the same instructions.
	async fn solve_single_with_retry(&self, http: &reqwest::Client, task: &QuizTask, url: &str) -> Option<Verdict> {
		let rendered = match browser::render(url, RENDER_TIMEOUT).await {
			Ok(r) => r,
			Err(e) => {
				tracing::error!(%url, "failed to render quiz page: {e}");
				return None;
			}
		};

		let Some(instructions) = extract::extract_instructions(&rendered.html) else {
			tracing::error!(%url, "could not extract quiz instructions");
			return None;
		};
		tracing::info!(preview = %instructions.chars().take(200).collect::<String>(), "quiz instructions extracted");

		let Some(submit_url) = extract::extract_submit_url(&instructions) else {
			tracing::error!(%url, "could not find submit url in quiz instructions");
			return None;
		};
		tracing::info!(%submit_url, "submit url extracted");

		for attempt in 1..=MAX_RETRIES {
			if task.started.elapsed() > QUIZ_DEADLINE {
				tracing::error!("quiz deadline exceeded during retry");
				return None;
			}
			tracing::info!(attempt, max = MAX_RETRIES, "solve attempt");

			let Some(answer) = self.llm.solve(&instructions, url).await else {
				tracing::error!("failed to generate answer");
				continue;
			};
			tracing::info!(%answer, kind = answer.type_name(), "generated answer");

			let Some(verdict) = submit_answer(http, &submit_url, task, url, &answer).await else {
				tracing::error!("failed to submit answer");
				continue;
			};

			if verdict.correct || verdict.url.is_some() {
				return Some(verdict);
			}

			tracing::warn!(reason = ?verdict.reason, "answer incorrect");
			if attempt < MAX_RETRIES {
				// Retry is blind: the reason is logged, not fed back
				tracing::info!("retrying with a new answer");
			}
		}

		tracing::error!("all retry attempts exhausted");
		None
	}
}

async fn submit_answer(http: &reqwest::Client, submit_url: &str, task: &QuizTask, quiz_url: &str, answer: &Answer) -> Option<Verdict> {
	let payload = json!({
		"email": task.email,
		"secret": task.secret,
		"url": quiz_url,
		"answer": answer
	});
	let body = match serde_json::to_vec(&payload) {
		Ok(b) => b,
		Err(e) => {
			tracing::error!("failed to serialize submission payload: {e}");
			return None;
		}
	};
	if body.len() > MAX_PAYLOAD_SIZE {
		tracing::error!(size = body.len(), "submission payload too large");
		return None;
	}

	tracing::info!(%submit_url, "submitting answer");
	let response = match http
		.post(submit_url)
		.header(reqwest::header::CONTENT_TYPE, "application/json")
		.body(body)
		.send()
		.await
	{
		Ok(r) => r,
		Err(e) => {
			tracing::error!("error submitting answer: {e}");
			return None;
		}
	};

	if !response.status().is_success() {
		let status = response.status();
		let text = response.text().await.unwrap_or_default();
		tracing::error!(%status, body = %text.chars().take(200).collect::<String>(), "http error submitting answer");
		return None;
	}

	match response.json::<Verdict>().await {
		Ok(verdict) => {
			tracing::info!(correct = verdict.correct, next = ?verdict.url, "submission result");
			Some(verdict)
		}
		Err(e) => {
			tracing::error!("failed to decode submission result: {e}");
			None
		}
	}
}
