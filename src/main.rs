use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use tokio::net::TcpListener;

use quiz_agent::{
	browser,
	config::Config,
	server::{AppState, build_router},
	solver::QuizSolver,
	telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "quiz_agent")]
#[command(about = "LLM-driven quiz chain solving service", long_about = None)]
struct Args {
	/// Override the listen host from the environment
	#[arg(long)]
	host: Option<String>,

	/// Override the listen port from the environment
	#[arg(long)]
	port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	telemetry::init_tracing();
	let args = Args::parse();

	let mut config = Config::from_env()?;
	if let Some(host) = args.host {
		config.host = host;
	}
	if let Some(port) = args.port {
		config.port = port;
	}

	let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse().map_err(|e| eyre!("Invalid listen address: {e}"))?;

	let solver = QuizSolver::new(&config)?;
	let state = Arc::new(AppState { config, solver });
	let app = build_router(state);

	let listener = TcpListener::bind(addr).await?;
	tracing::info!(%addr, "HTTP server listening");
	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

	// Release the shared browser engine; safe when it was never started
	browser::shutdown().await;
	Ok(())
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	tracing::info!("shutdown signal received");
}
