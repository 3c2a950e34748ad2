use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the watcher core.
///
/// Startup errors ([`Connect`](Error::Connect), [`Auth`](Error::Auth),
/// [`Config`](Error::Config)) propagate to the caller of
/// `Orchestrator::start`. Everything else is recovered where it happens and
/// only logged or turned into an event.
#[derive(Debug, Error)]
pub enum Error {
	#[error("uplink connection failed: {0}")]
	Connect(String),

	#[error("authentication rejected ({code}): {message}")]
	Auth { code: String, message: String },

	#[error("navigation to {url} failed: {reason}")]
	Navigation { url: String, reason: String },

	#[error("frame capture failed: {0}")]
	Capture(String),

	#[error("uplink send failed: {0}")]
	Send(String),

	#[error("gave up reconnecting after {attempts} attempts")]
	MaxReconnectExceeded { attempts: u32 },

	#[error("browser error: {0}")]
	Browser(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("timeout after {ms}ms waiting for: {condition}")]
	Timeout { ms: u64, condition: String },

	#[error("no active stream with id {0}")]
	UnknownStream(String),

	#[error(transparent)]
	Runtime(#[from] watcher_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Whether this error must abort startup.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Error::Connect(_) | Error::Auth { .. } | Error::Config(_))
	}

	/// Whether the browser target behind a session is gone for good.
	pub fn is_target_closed(&self) -> bool {
		match self {
			Error::Runtime(e) => e.is_target_closed(),
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn startup_errors_are_fatal() {
		assert!(Error::Connect("refused".into()).is_fatal());
		assert!(
			Error::Auth {
				code: "INVALID_KEY".into(),
				message: "bad key".into()
			}
			.is_fatal()
		);
		assert!(!Error::Send("closed".into()).is_fatal());
		assert!(!Error::Capture("blank".into()).is_fatal());
	}

	#[test]
	fn runtime_target_closed_passes_through() {
		let err: Error = watcher_runtime::Error::ChannelClosed.into();
		assert!(err.is_target_closed());
		assert!(!Error::Browser("x".into()).is_target_closed());
	}
}
