use std::sync::Arc;

use axum::{
	Router,
	body::{Body, to_bytes},
	http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use quiz_agent::{
	config::{Config, MAX_PAYLOAD_SIZE},
	server::{AppState, build_router},
	solver::QuizSolver,
};

fn test_config() -> Config {
	Config {
		email: "student@example.com".into(),
		secret: "s3cret".into(),
		openai_api_key: "test-key".into(),
		// Unroutable endpoints so a spawned run fails fast instead of calling out
		openai_base_url: "http://127.0.0.1:1".into(),
		openai_model: "gpt-4-turbo-preview".into(),
		chart_backend_url: "http://127.0.0.1:1/chart".into(),
		host: "127.0.0.1".into(),
		port: 0,
	}
}

fn test_app() -> Router {
	let config = test_config();
	let solver = QuizSolver::new(&config).expect("solver");
	build_router(Arc::new(AppState { config, solver }))
}

fn quiz_request(body: Body) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri("/quiz")
		.header("content-type", "application/json")
		.body(body)
		.unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
	let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
	let response = test_app()
		.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response_json(response).await, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn root_describes_endpoints() {
	let response = test_app().oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = response_json(response).await;
	assert_eq!(body["message"], json!("Quiz Solver API"));
}

#[tokio::test]
async fn invalid_json_is_rejected() {
	let response = test_app().oneshot(quiz_request(Body::from("{not json"))).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_fields_are_rejected() {
	let body = serde_json::to_string(&json!({ "email": "student@example.com" })).unwrap();
	let response = test_app().oneshot(quiz_request(Body::from(body))).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_secret_is_forbidden() {
	let body = serde_json::to_string(&json!({
		"email": "student@example.com",
		"secret": "wrong",
		"url": "http://127.0.0.1:1/quiz"
	}))
	.unwrap();
	let response = test_app().oneshot(quiz_request(Body::from(body))).await.unwrap();
	assert_eq!(response.status(), StatusCode::FORBIDDEN);
	assert_eq!(response_json(response).await["detail"], json!("Invalid secret"));
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
	let padding = "x".repeat(MAX_PAYLOAD_SIZE + 1);
	let response = test_app().oneshot(quiz_request(Body::from(padding))).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert_eq!(response_json(response).await["detail"], json!("Payload too large"));
}

#[tokio::test]
async fn valid_request_is_accepted_immediately() {
	let body = serde_json::to_string(&json!({
		"email": "student@example.com",
		"secret": "s3cret",
		"url": "http://127.0.0.1:1/quiz",
		"extra_field": "ignored"
	}))
	.unwrap();
	let response = test_app().oneshot(quiz_request(Body::from(body))).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let reply = response_json(response).await;
	assert_eq!(reply["status"], json!("accepted"));
}

#[tokio::test]
async fn email_mismatch_is_still_accepted_when_secret_matches() {
	let body = serde_json::to_string(&json!({
		"email": "someone-else@example.com",
		"secret": "s3cret",
		"url": "http://127.0.0.1:1/quiz"
	}))
	.unwrap();
	let response = test_app().oneshot(quiz_request(Body::from(body))).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}
