//! Read-only HTTP surface over [`Orchestrator::stats`].
//!
//! - `GET /health`: liveness summary
//! - `GET /stats`: the full [`OrchestratorStats`](watcher::OrchestratorStats)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use watcher::{Orchestrator, OrchestratorStats};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
	pub status: &'static str,
	pub uptime_secs: u64,
	pub uplink_connected: bool,
	pub active_streams: usize,
}

impl HealthBody {
	pub fn from_stats(stats: &OrchestratorStats) -> Self {
		let status = if !stats.running {
			"stopped"
		} else if stats.uplink.connected && stats.active_streams > 0 {
			"ok"
		} else {
			"degraded"
		};
		Self {
			status,
			uptime_secs: stats.uptime_secs,
			uplink_connected: stats.uplink.connected,
			active_streams: stats.active_streams,
		}
	}
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/stats", get(stats))
		.with_state(orchestrator)
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> Json<HealthBody> {
	Json(HealthBody::from_stats(&orchestrator.stats()))
}

async fn stats(State(orchestrator): State<Arc<Orchestrator>>) -> Json<OrchestratorStats> {
	Json(orchestrator.stats())
}

pub async fn bind(port: u16) -> Result<TcpListener> {
	let addr = SocketAddr::from(([0, 0, 0, 0], port));
	TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind health server to {addr}"))
}

/// Serves until `shutdown` flips to `true`.
pub async fn serve(
	listener: TcpListener,
	orchestrator: Arc<Orchestrator>,
	mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
	let addr = listener.local_addr()?;
	tracing::info!(target: "watcher.cli", %addr, "health endpoint listening");
	axum::serve(listener, router(orchestrator).into_make_service())
		.with_graceful_shutdown(async move {
			let _ = shutdown.wait_for(|stop| *stop).await;
		})
		.await
		.context("health server error")
}
