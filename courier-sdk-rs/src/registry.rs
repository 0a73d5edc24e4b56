use std::collections::HashMap;

use courier_types::proto::WebSocketResponseMessage;
use http::Method;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::Error;
use crate::request::{ChatResponse, retry_after_seconds};

/// One in-flight request awaiting its response frame.
///
/// Completion is exactly-once by construction: every completion path
/// first removes the entry from the registry, and the oneshot sender it
/// holds can only be consumed once. Late timeouts or responses find no
/// entry and are no-ops.
pub(crate) struct PendingRequest {
	url: String,
	method: Method,
	started_at: Instant,
	sink: oneshot::Sender<Result<ChatResponse, Error>>,
	timeout: AbortHandle,
}

impl PendingRequest {
	pub fn new(
		url: String,
		method: Method,
		sink: oneshot::Sender<Result<ChatResponse, Error>>,
		timeout: AbortHandle,
	) -> Self {
		Self {
			url,
			method,
			started_at: Instant::now(),
			sink,
			timeout,
		}
	}

	/// Complete with a response frame: 2xx becomes a success, anything
	/// else a preprocessed HTTP error. Returns whether the completion
	/// was a success.
	pub fn complete(self, wire: WebSocketResponseMessage) -> bool {
		self.timeout.abort();
		let result = match ChatResponse::from_wire(wire, &self.url) {
			Ok(response) if response.status.is_success() => {
				log::debug!(
					"{} {} -> {} after {:?}",
					self.method,
					self.url,
					response.status,
					self.started_at.elapsed()
				);
				Ok(response)
			}
			Ok(response) => {
				log::info!(
					"{} {} -> {} after {:?}",
					self.method,
					self.url,
					response.status,
					self.started_at.elapsed()
				);
				let retry_after = retry_after_seconds(&response.headers);
				Err(Error::Http {
					url: self.url,
					status: response.status,
					headers: response.headers,
					body: response.body,
					retry_after,
				})
			}
			Err(e) => Err(e),
		};
		let success = result.is_ok();
		let _ = self.sink.send(result);
		success
	}

	pub fn fail_network(self) {
		self.timeout.abort();
		let _ = self.sink.send(Err(Error::NetworkFailure(self.url)));
	}

	pub fn fail_invalid(self) {
		self.timeout.abort();
		let _ = self.sink.send(Err(Error::InvalidRequest(self.url)));
	}
}

/// Outstanding requests of one connection instance, keyed by the
/// random wire request id.
#[derive(Default)]
pub(crate) struct RequestRegistry {
	pending: HashMap<u64, PendingRequest>,
}

impl RequestRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// A fresh random request id, unique within this registry. Ids come
	/// from a CSPRNG; a collision with an in-flight request is the only
	/// thing worth avoiding, and regeneration handles it.
	pub fn next_request_id(&self) -> u64 {
		let mut rng = rand::rng();
		loop {
			let id: u64 = rng.random();
			if !self.pending.contains_key(&id) {
				return id;
			}
		}
	}

	pub fn insert(&mut self, request_id: u64, pending: PendingRequest) {
		let previous = self.pending.insert(request_id, pending);
		debug_assert!(previous.is_none(), "request id collision");
	}

	pub fn pop(&mut self, request_id: u64) -> Option<PendingRequest> {
		self.pending.remove(&request_id)
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Fail every outstanding request; used when the owning instance
	/// goes away.
	pub fn drain_all(&mut self) {
		for (_, pending) in self.pending.drain() {
			pending.fail_network();
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use http::{Method, StatusCode};

	use super::*;

	fn pending(
		url: &str,
	) -> (
		PendingRequest,
		oneshot::Receiver<Result<ChatResponse, Error>>,
	) {
		let (tx, rx) = oneshot::channel();
		let timeout = tokio::spawn(std::future::pending::<()>()).abort_handle();
		(PendingRequest::new(url.to_string(), Method::GET, tx, timeout), rx)
	}

	#[tokio::test]
	async fn success_statuses_complete_with_the_response() {
		let (pending, mut rx) = pending("v1/profile");
		let was_success = pending.complete(WebSocketResponseMessage {
			id: Some(1),
			status: Some(204),
			message: Some("No Content".to_string()),
			body: None,
			headers: vec![],
		});
		assert!(was_success);
		let response = rx.try_recv().unwrap().unwrap();
		assert_eq!(response.status, StatusCode::NO_CONTENT);
	}

	#[tokio::test]
	async fn error_statuses_complete_with_preprocessed_http_errors() {
		let (pending, mut rx) = pending("v1/profile");
		let was_success = pending.complete(WebSocketResponseMessage {
			id: Some(1),
			status: Some(429),
			message: Some("Too Many Requests".to_string()),
			body: Some(b"slow down".to_vec()),
			headers: vec!["Retry-After: 86400".to_string()],
		});
		assert!(!was_success);
		assert_matches!(
			rx.try_recv().unwrap(),
			Err(Error::Http { status, retry_after, .. }) => {
				assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
				assert_eq!(retry_after, Some(86400));
			}
		);
	}

	#[tokio::test]
	async fn malformed_statuses_complete_as_network_failures() {
		let (pending, mut rx) = pending("v1/profile");
		let was_success = pending.complete(WebSocketResponseMessage {
			id: Some(1),
			status: None,
			message: None,
			body: None,
			headers: vec![],
		});
		assert!(!was_success);
		assert_matches!(rx.try_recv().unwrap(), Err(Error::NetworkFailure(url)) if url == "v1/profile");
	}

	#[tokio::test]
	async fn drain_fails_everything_with_network_failure() {
		let mut registry = RequestRegistry::new();
		let (first, mut first_rx) = pending("v1/a");
		let (second, mut second_rx) = pending("v1/b");
		let first_id = registry.next_request_id();
		registry.insert(first_id, first);
		let second_id = registry.next_request_id();
		registry.insert(second_id, second);
		assert_ne!(first_id, second_id);

		registry.drain_all();
		assert!(registry.is_empty());
		assert_matches!(first_rx.try_recv().unwrap(), Err(Error::NetworkFailure(_)));
		assert_matches!(second_rx.try_recv().unwrap(), Err(Error::NetworkFailure(_)));
	}

	#[tokio::test]
	async fn pop_is_exactly_once() {
		let mut registry = RequestRegistry::new();
		let (pending, _rx) = pending("v1/a");
		let id = registry.next_request_id();
		registry.insert(id, pending);

		assert!(registry.pop(id).is_some());
		assert!(registry.pop(id).is_none());
	}
}
