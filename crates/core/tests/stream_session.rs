mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeLauncher, RecordingSink, sources};
use watcher::{Error, NoDetections, SessionOptions, StreamSession, StreamState};

fn options() -> SessionOptions {
	SessionOptions {
		tick_interval: Duration::from_secs(1),
		..SessionOptions::default()
	}
}

async fn start(launcher: &Arc<FakeLauncher>, sink: &Arc<RecordingSink>) -> StreamSession {
	StreamSession::start(
		sources(1).remove(0),
		launcher.as_ref(),
		sink.clone(),
		Arc::new(NoDetections),
		options(),
	)
	.await
	.unwrap()
}

#[tokio::test(start_paused = true)]
async fn frame_ids_count_up_from_one() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;

	tokio::time::sleep(Duration::from_millis(4500)).await;

	let ids = sink.frame_ids();
	assert!(ids.len() >= 4, "got {ids:?}");
	assert_eq!(ids, (1..=ids.len() as u64).collect::<Vec<_>>());
	assert_eq!(session.frames_captured(), ids.len() as u64);
	assert_eq!(session.state(), StreamState::Playing);

	let first = &sink.observations.lock()[0];
	assert_eq!((first.frame_width, first.frame_height), (1280, 720));
	assert_eq!(first.video_id.as_deref(), Some("vid-1"));
	assert!(first.frame.is_none());
}

#[tokio::test(start_paused = true)]
async fn registers_and_refreshes_stream_context() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;
	tokio::time::sleep(Duration::from_millis(1500)).await;

	let streams = sink.streams.lock().clone();
	assert_eq!(streams[0].stream_id, session.id());
	assert_eq!(streams[0].video_id, None);
	let latest = streams.last().unwrap();
	assert_eq!(latest.video_id.as_deref(), Some("vid-1"));
	assert_eq!(latest.title.as_deref(), Some("Harbor cam"));
}

#[tokio::test(start_paused = true)]
async fn frozen_position_stalls_after_three_ticks() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;
	launcher.probe(0).advancing.store(false, Ordering::SeqCst);

	tokio::time::sleep(Duration::from_millis(2500)).await;
	assert_eq!(session.state(), StreamState::Stalled);

	launcher.probe(0).advancing.store(true, Ordering::SeqCst);
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert_eq!(session.state(), StreamState::Playing);
}

#[tokio::test(start_paused = true)]
async fn paused_session_submits_nothing() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;
	tokio::time::sleep(Duration::from_millis(1500)).await;

	session.pause().await.unwrap();
	assert!(session.is_paused());
	assert!(launcher.probe(0).paused.load(Ordering::SeqCst));
	let before = sink.count();

	tokio::time::sleep(Duration::from_secs(5)).await;
	assert_eq!(sink.count(), before);

	session.resume().await.unwrap();
	assert!(!launcher.probe(0).paused.load(Ordering::SeqCst));
	tokio::time::sleep(Duration::from_secs(2)).await;
	assert!(sink.count() > before);
	assert_eq!(sink.frame_ids().last().copied(), Some(sink.count() as u64));
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_releases_browser() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;
	tokio::time::sleep(Duration::from_millis(1500)).await;

	session.stop().await.unwrap();
	session.stop().await.unwrap();

	let probe = launcher.probe(0);
	assert!(probe.closed.load(Ordering::SeqCst));
	assert_eq!(probe.close_calls.load(Ordering::SeqCst), 1);
	assert_eq!(session.state(), StreamState::Stopped);
	assert!(!session.is_running());
	assert_eq!(*sink.removed.lock(), vec![session.id().to_string()]);

	let frames = sink.count();
	tokio::time::sleep(Duration::from_secs(3)).await;
	assert_eq!(sink.count(), frames);
	assert_eq!(session.snapshot().frames_captured, frames as u64);
}

#[tokio::test(start_paused = true)]
async fn closed_target_moves_to_error_and_ends_loop() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;
	tokio::time::sleep(Duration::from_millis(1500)).await;

	launcher.probe(0).target_closed.store(true, Ordering::SeqCst);
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert_eq!(session.state(), StreamState::Error);

	let frames = sink.count();
	launcher.probe(0).target_closed.store(false, Ordering::SeqCst);
	tokio::time::sleep(Duration::from_secs(3)).await;
	assert_eq!(sink.count(), frames);

	session.stop().await.unwrap();
	assert_eq!(session.state(), StreamState::Error);
	assert!(launcher.probe(0).closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn isolated_capture_failures_are_tolerated() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;
	tokio::time::sleep(Duration::from_millis(1500)).await;

	launcher.probe(0).fail_capture.store(true, Ordering::SeqCst);
	tokio::time::sleep(Duration::from_secs(3)).await;
	assert_eq!(session.state(), StreamState::Playing);

	launcher.probe(0).fail_capture.store(false, Ordering::SeqCst);
	let before = sink.count();
	tokio::time::sleep(Duration::from_secs(2)).await;
	assert!(sink.count() > before);
	let ids = sink.frame_ids();
	assert_eq!(ids, (1..=ids.len() as u64).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn empty_frames_produce_no_observation() {
	let launcher = FakeLauncher::new();
	let sink = RecordingSink::new();
	let session = start(&launcher, &sink).await;
	launcher.probe(0).empty_frames.store(true, Ordering::SeqCst);

	tokio::time::sleep(Duration::from_millis(3500)).await;
	assert!(launcher.probe(0).captures.load(Ordering::SeqCst) >= 3);
	assert_eq!(sink.count(), 0);
	assert_eq!(session.state(), StreamState::Playing);
	assert_eq!(session.frames_captured(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_navigation_closes_the_page() {
	let launcher = FakeLauncher::new();
	let source = sources(1).remove(0);
	launcher.fail_url(&source.url);

	let result = StreamSession::start(
		source,
		launcher.as_ref(),
		RecordingSink::new(),
		Arc::new(NoDetections),
		options(),
	)
	.await;

	assert!(matches!(result, Err(Error::Navigation { .. })));
	assert!(launcher.probe(0).closed.load(Ordering::SeqCst));
}
