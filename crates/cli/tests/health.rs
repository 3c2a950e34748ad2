use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use watcher::protocol::Source;
use watcher::{
	BrowserLauncher, BrowserSession, Error, Orchestrator, Result, UplinkChannel, UplinkOptions,
	WatcherConfig,
};
use watcher_cli::health;
use watcher_runtime::FakeConnector;

struct NoBrowser;

#[async_trait]
impl BrowserLauncher for NoBrowser {
	async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
		Err(Error::Browser("no browser in tests".into()))
	}
}

fn orchestrator() -> Arc<Orchestrator> {
	let mut config = WatcherConfig::default();
	config.uplink.api_key = "k".into();
	config.sources = vec![Source::new("harbor", "https://example.com/watch?v=harbor")];
	let uplink = UplinkChannel::new(Arc::new(FakeConnector::new()), UplinkOptions::default());
	Arc::new(Orchestrator::new(Arc::new(config), uplink, Arc::new(NoBrowser)))
}

#[tokio::test]
async fn serves_health_and_stats() {
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let server = tokio::spawn(health::serve(listener, orchestrator(), shutdown_rx));

	let body: Value = reqwest::get(format!("http://{addr}/health"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body["status"], "stopped");
	assert_eq!(body["uplinkConnected"], false);
	assert_eq!(body["activeStreams"], 0);
	assert!(body["uptimeSecs"].is_u64());

	let stats: Value = reqwest::get(format!("http://{addr}/stats"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(stats["maxConcurrent"], 3);
	assert_eq!(stats["sourceCount"], 1);
	assert_eq!(stats["rotationMode"], "priority");
	assert!(stats["streams"].as_array().unwrap().is_empty());

	shutdown_tx.send_replace(true);
	server.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let server = tokio::spawn(health::serve(listener, orchestrator(), shutdown_rx));

	let response = reqwest::get(format!("http://{addr}/control")).await.unwrap();
	assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

	shutdown_tx.send_replace(true);
	server.await.unwrap().unwrap();
}
