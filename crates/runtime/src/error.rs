//! Error types for the watcher runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the watcher runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Failed to launch the browser process.
	#[error("Failed to launch browser: {0}")]
	LaunchFailed(String),

	/// Failed to open a connection.
	#[error("Failed to connect: {0}")]
	ConnectionFailed(String),

	/// Transport-level error (socket write/read).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Malformed or unexpected protocol traffic.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Error answered by the remote DevTools endpoint.
	#[error("Remote error {code}: {message}")]
	Remote { code: i64, message: String },

	/// HTTP request to the DevTools endpoint failed.
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// Timeout waiting for an operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// The page or browser went away.
	#[error("Target closed: {0}")]
	TargetClosed(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Invalid argument provided to method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if the remote target is gone and retrying is pointless.
	pub fn is_target_closed(&self) -> bool {
		match self {
			Error::TargetClosed(_) | Error::ChannelClosed => true,
			Error::Remote { message, .. } => {
				message.contains("Target closed")
					|| message.contains("No target with given id")
					|| message.contains("Session with given id not found")
			}
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_target_errors_are_classified() {
		let err = Error::Remote {
			code: -32000,
			message: "No target with given id found".into(),
		};
		assert!(err.is_target_closed());
		assert!(!err.is_timeout());
		assert!(Error::ChannelClosed.is_target_closed());
		assert!(Error::Timeout("x".into()).is_timeout());
	}
}
