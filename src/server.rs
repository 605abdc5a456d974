//! HTTP front door: request validation and fire-and-forget task spawning.
//!
//! The response only ever reflects request validity. The quiz outcome is
//! decoupled from the request/response cycle and observable through logs.

use std::sync::Arc;

use axum::{
	Json, Router,
	body::Bytes,
	extract::State,
	http::StatusCode,
	response::IntoResponse,
	routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::{
	QuizTask,
	config::{Config, MAX_PAYLOAD_SIZE},
	solver::QuizSolver,
};

pub struct AppState {
	pub config: Config,
	pub solver: QuizSolver,
}

/// Accepted task shape; extra fields are allowed and ignored
#[derive(Debug, Deserialize)]
struct QuizRequest {
	email: String,
	secret: String,
	url: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/", get(root))
		.route("/health", get(health))
		.route("/quiz", post(handle_quiz_task))
		.with_state(state)
		.layer(TraceLayer::new_for_http())
}

async fn root() -> impl IntoResponse {
	Json(json!({
		"message": "Quiz Solver API",
		"version": env!("CARGO_PKG_VERSION"),
		"endpoints": {
			"POST /quiz": "Submit a quiz task",
			"GET /health": "Health check"
		}
	}))
}

async fn health() -> impl IntoResponse {
	Json(json!({ "status": "healthy" }))
}

/// Accept a quiz task: 200 when processing started, 400 on a malformed
/// request, 403 on a bad secret.
async fn handle_quiz_task(State(state): State<Arc<AppState>>, body: Bytes) -> (StatusCode, Json<Value>) {
	if body.len() > MAX_PAYLOAD_SIZE {
		return (StatusCode::BAD_REQUEST, Json(json!({ "detail": "Payload too large" })));
	}

	let payload: Value = match serde_json::from_slice(&body) {
		Ok(v) => v,
		Err(e) => {
			tracing::error!("invalid json: {e}");
			return (StatusCode::BAD_REQUEST, Json(json!({ "detail": format!("Invalid JSON: {e}") })));
		}
	};
	let request: QuizRequest = match serde_json::from_value(payload) {
		Ok(r) => r,
		Err(e) => {
			tracing::error!("validation error: {e}");
			return (StatusCode::BAD_REQUEST, Json(json!({ "detail": format!("Invalid request format: {e}") })));
		}
	};

	if request.secret != state.config.secret {
		tracing::warn!(email = %request.email, "invalid secret attempt");
		return (StatusCode::FORBIDDEN, Json(json!({ "detail": "Invalid secret" })));
	}
	if request.email != state.config.email {
		// The secret authenticates; a mismatching email is only suspicious
		tracing::warn!(email = %request.email, expected = %state.config.email, "email mismatch");
	}

	tracing::info!(url = %request.url, "valid request received");

	// Detached: no result channel back to the caller
	let task = QuizTask::new(request.url, request.email, request.secret);
	let solver_state = state.clone();
	tokio::spawn(async move {
		solver_state.solver.solve_quiz(task).await;
	});

	(StatusCode::OK, Json(json!({ "status": "accepted", "message": "Quiz task received and processing started" })))
}
