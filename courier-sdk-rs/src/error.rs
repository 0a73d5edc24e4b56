use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// Errors surfaced to callers of the chat connection.
///
/// Every request completes with exactly one of these or a
/// [`ChatResponse`](crate::request::ChatResponse); completion paths are
/// idempotent, so a late timeout or disconnect after a response has
/// been delivered is a no-op.
#[derive(Debug, Error)]
pub enum Error {
	/// The app is expired or not ready to make requests.
	#[error("app state does not permit the request to `{0}`")]
	InvalidAppState(String),
	/// Malformed URL, missing method, body encoding failure, or a
	/// transport that rejected the frame at submit time.
	#[error("invalid request to `{0}`")]
	InvalidRequest(String),
	/// No open socket, the socket closed mid-flight, or the request
	/// timed out.
	#[error("network failure for request to `{0}`")]
	NetworkFailure(String),
	/// The server answered with a non-2xx status.
	#[error("request to `{url}` failed with HTTP {status}")]
	Http {
		url: String,
		status: StatusCode,
		headers: HeaderMap,
		body: Option<Bytes>,
		/// Parsed `Retry-After` seconds, when the server sent one.
		retry_after: Option<u64>,
	},
	/// Only returned from `await_open` when the caller cancels.
	#[error("cancelled while waiting for the connection to open")]
	Cancelled,
	/// Transport-level failure not attributable to a single request.
	#[error("transport error: {0}")]
	Transport(String),
}

impl Error {
	pub(crate) fn transport(message: impl Into<String>) -> Self {
		Error::Transport(message.into())
	}
}
