//! Page scripts evaluated through `Runtime.evaluate`.
//!
//! Each is a self-invoking expression returning a JSON-serializable value.

/// Player state in the shape of [`PlaybackState`](super::PlaybackState).
pub(super) const PLAYBACK_STATE: &str = r#"(() => {
	const v = document.querySelector('video');
	const params = new URL(location.href).searchParams;
	const videoId = params.get('v') || location.pathname.split('/').filter(Boolean).pop() || null;
	const heading = document.querySelector('h1');
	const title = (heading && heading.textContent.trim()) || document.title || null;
	if (!v) {
		return { isPlaying: false, isBuffering: false, currentTime: 0, videoId, title };
	}
	return {
		isPlaying: !v.paused && !v.ended && v.readyState > 2,
		isBuffering: !v.paused && !v.ended && v.readyState < 3,
		currentTime: v.currentTime,
		duration: Number.isFinite(v.duration) ? v.duration : null,
		videoId,
		title,
		videoWidth: v.videoWidth || null,
		videoHeight: v.videoHeight || null,
	};
})()"#;

/// `true` once a video element has metadata loaded.
pub(super) const VIDEO_READY: &str = r#"(() => {
	const v = document.querySelector('video');
	return !!v && v.readyState >= 1;
})()"#;

/// Clicks through cookie and consent overlays. Returns how many were dismissed.
pub(super) const DISMISS_POPUPS: &str = r#"(() => {
	const labels = ['accept all', 'accept', 'agree', 'i agree', 'reject all', 'no thanks', 'dismiss', 'close'];
	let dismissed = 0;
	for (const el of document.querySelectorAll('button, [role="button"]')) {
		const text = (el.innerText || el.getAttribute('aria-label') || '').trim().toLowerCase();
		if (labels.includes(text) && el.offsetParent !== null) {
			el.click();
			dismissed += 1;
		}
	}
	return dismissed;
})()"#;

/// Starts muted playback; autoplay policies reject unmuted starts.
pub(super) const START_PLAYBACK: &str = r#"(async () => {
	const v = document.querySelector('video');
	if (!v) return false;
	v.muted = true;
	try { await v.play(); return true; } catch (_) { return false; }
})()"#;

pub(super) const PAUSE: &str = r#"(() => {
	const v = document.querySelector('video');
	if (v) v.pause();
	return !!v;
})()"#;

pub(super) const RESUME: &str = r#"(async () => {
	const v = document.querySelector('video');
	if (!v) return false;
	try { await v.play(); return true; } catch (_) { return false; }
})()"#;
