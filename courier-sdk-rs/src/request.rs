use bytes::Bytes;
use courier_types::proto::{WebSocketRequestMessage, WebSocketResponseMessage};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use serde::Serialize;

use crate::error::Error;

/// An outbound RPC-style request carried inside the WebSocket.
///
/// The URL is relative: path plus optional query, no scheme, no host,
/// no leading slash (`"v1/profile"`, `"v1/messages?story=true"`). The
/// leading slash is added when the frame is built.
#[derive(Debug, Clone)]
pub struct ChatRequest {
	pub(crate) method: Method,
	pub(crate) url: String,
	pub(crate) headers: Vec<(String, String)>,
	pub(crate) body: RequestBody,
	pub(crate) authenticated: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) enum RequestBody {
	#[default]
	None,
	/// A preformed payload, sent as-is.
	Bytes(Bytes),
	/// A parameter map, serialized to JSON when the frame is built.
	JsonParams(serde_json::Value),
	/// A parameter map that failed to serialize; the request completes
	/// with `InvalidRequest` at submit time.
	InvalidJson,
}

impl ChatRequest {
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			url: url.into(),
			headers: Vec::new(),
			body: RequestBody::None,
			authenticated: true,
		}
	}

	pub fn get(url: impl Into<String>) -> Self {
		Self::new(Method::GET, url)
	}

	pub fn put(url: impl Into<String>) -> Self {
		Self::new(Method::PUT, url)
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	pub fn body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = RequestBody::Bytes(body.into());
		self
	}

	/// Attach a JSON parameter map. Serialization happens at submit
	/// time; a failure there completes the request with
	/// [`Error::InvalidRequest`].
	pub fn json_params(mut self, params: &impl Serialize) -> Self {
		self.body = match serde_json::to_value(params) {
			Ok(value) => RequestBody::JsonParams(value),
			Err(_) => RequestBody::InvalidJson,
		};
		self
	}

	/// Mark the request as one that must travel on the unidentified
	/// socket.
	pub fn unauthenticated(mut self) -> Self {
		self.authenticated = false;
		self
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	fn has_header(&self, name: &str) -> bool {
		self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
	}

	/// The `/`-prefixed path+query for the wire frame, or `None` for a
	/// URL this core refuses to send (empty, or absolute).
	pub(crate) fn wire_path(&self) -> Option<String> {
		if self.url.is_empty() || self.url.contains("://") {
			return None;
		}
		if let Some(stripped) = self.url.strip_prefix('/') {
			if stripped.is_empty() {
				return None;
			}
			Some(self.url.clone())
		} else {
			Some(format!("/{}", self.url))
		}
	}

	/// Build the wire request. Default `User-Agent` and
	/// `Accept-Language` headers are merged in without overwriting
	/// caller values; `Content-Type: application/json` is forced only
	/// for parameter-map bodies where the caller set no Content-Type of
	/// their own.
	pub(crate) fn to_wire(
		&self,
		request_id: u64,
		user_agent: &str,
		accept_language: &str,
	) -> Result<WebSocketRequestMessage, Error> {
		let path = self
			.wire_path()
			.ok_or_else(|| Error::InvalidRequest(self.url.clone()))?;

		let mut headers: Vec<String> = self
			.headers
			.iter()
			.map(|(name, value)| format!("{name}:{value}"))
			.collect();
		if !self.has_header("user-agent") {
			headers.push(format!("user-agent:{user_agent}"));
		}
		if !self.has_header("accept-language") {
			headers.push(format!("accept-language:{accept_language}"));
		}

		let body = match &self.body {
			RequestBody::None => None,
			RequestBody::Bytes(bytes) => Some(bytes.to_vec()),
			RequestBody::JsonParams(params) => {
				if !self.has_header("content-type") {
					headers.push("content-type:application/json".to_string());
				}
				Some(
					serde_json::to_vec(params)
						.map_err(|_| Error::InvalidRequest(self.url.clone()))?,
				)
			}
			RequestBody::InvalidJson => {
				return Err(Error::InvalidRequest(self.url.clone()));
			}
		};

		Ok(WebSocketRequestMessage {
			verb: Some(self.method.to_string()),
			path: Some(path),
			body,
			id: Some(request_id),
			headers,
		})
	}
}

/// A completed server response to an outbound request.
#[derive(Debug, Clone)]
pub struct ChatResponse {
	pub status: StatusCode,
	pub message: Option<String>,
	pub headers: HeaderMap,
	pub body: Option<Bytes>,
}

impl ChatResponse {
	pub(crate) fn from_wire(wire: WebSocketResponseMessage, url: &str) -> Result<Self, Error> {
		let status = wire
			.status
			.and_then(|s| u16::try_from(s).ok())
			.and_then(|s| StatusCode::from_u16(s).ok())
			.ok_or_else(|| Error::NetworkFailure(url.to_string()))?;
		Ok(Self {
			status,
			message: wire.message,
			headers: parse_wire_headers(&wire.headers),
			body: wire.body.map(Bytes::from),
		})
	}
}

/// Parse `"Name:Value"` wire headers, skipping malformed entries.
pub(crate) fn parse_wire_headers(wire: &[String]) -> HeaderMap {
	let mut headers = HeaderMap::new();
	for line in wire {
		let Some((name, value)) = line.split_once(':') else {
			log::warn!("dropping wire header without separator");
			continue;
		};
		match (
			HeaderName::from_bytes(name.trim().as_bytes()),
			HeaderValue::from_str(value.trim()),
		) {
			(Ok(name), Ok(value)) => {
				headers.insert(name, value);
			}
			_ => log::warn!("dropping malformed wire header `{}`", name),
		}
	}
	headers
}

/// Look up a wire header by case-insensitive name.
pub(crate) fn wire_header_value<'a>(wire: &'a [String], name: &str) -> Option<&'a str> {
	wire.iter().find_map(|line| {
		let (n, v) = line.split_once(':')?;
		n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
	})
}

/// `Retry-After` seconds from a non-2xx response, when present and
/// well-formed. Only the delta-seconds form is produced by the chat
/// server.
pub(crate) fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
	headers
		.get(header::RETRY_AFTER)?
		.to_str()
		.ok()?
		.trim()
		.parse()
		.ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_path_gets_leading_slash() {
		assert_eq!(
			ChatRequest::get("v1/profile?p=1").wire_path().as_deref(),
			Some("/v1/profile?p=1")
		);
		assert_eq!(
			ChatRequest::get("/v1/profile").wire_path().as_deref(),
			Some("/v1/profile")
		);
		assert_eq!(ChatRequest::get("").wire_path(), None);
		assert_eq!(ChatRequest::get("/").wire_path(), None);
		assert_eq!(
			ChatRequest::get("https://example.org/v1/profile").wire_path(),
			None
		);
	}

	#[test]
	fn default_headers_do_not_overwrite_caller_values() {
		let wire = ChatRequest::get("v1/profile")
			.header("User-Agent", "custom/2.0")
			.to_wire(1, "default/1.0", "en-US")
			.unwrap();
		assert!(wire.headers.contains(&"User-Agent:custom/2.0".to_string()));
		assert!(!wire.headers.iter().any(|h| h.contains("default/1.0")));
		assert!(wire.headers.contains(&"accept-language:en-US".to_string()));
	}

	#[test]
	fn json_params_force_content_type_only_without_caller_header() {
		let params = serde_json::json!({ "destination": "+14155550101" });

		let wire = ChatRequest::put("v1/messages")
			.json_params(&params)
			.to_wire(1, "ua", "en")
			.unwrap();
		assert!(
			wire.headers
				.contains(&"content-type:application/json".to_string())
		);
		assert_eq!(wire.body.as_deref(), Some(&b"{\"destination\":\"+14155550101\"}"[..]));

		let wire = ChatRequest::put("v1/messages")
			.header("Content-Type", "application/vnd.custom")
			.json_params(&params)
			.to_wire(1, "ua", "en")
			.unwrap();
		assert!(
			wire.headers
				.contains(&"Content-Type:application/vnd.custom".to_string())
		);
		assert!(
			!wire
				.headers
				.contains(&"content-type:application/json".to_string())
		);
	}

	#[test]
	fn preformed_bodies_never_force_content_type() {
		let wire = ChatRequest::put("v1/messages")
			.body(&b"raw"[..])
			.to_wire(1, "ua", "en")
			.unwrap();
		assert!(!wire.headers.iter().any(|h| h.starts_with("content-type")));
		assert_eq!(wire.body.as_deref(), Some(&b"raw"[..]));
	}

	#[test]
	fn retry_after_extraction() {
		let mut headers = HeaderMap::new();
		assert_eq!(retry_after_seconds(&headers), None);
		headers.insert(header::RETRY_AFTER, HeaderValue::from_static("170"));
		assert_eq!(retry_after_seconds(&headers), Some(170));
		headers.insert(header::RETRY_AFTER, HeaderValue::from_static("soon"));
		assert_eq!(retry_after_seconds(&headers), None);
	}

	#[test]
	fn wire_header_lookup_is_case_insensitive() {
		let wire = vec!["X-Signal-Timestamp: 1700000000000".to_string()];
		assert_eq!(
			wire_header_value(&wire, "x-signal-timestamp"),
			Some("1700000000000")
		);
		assert_eq!(wire_header_value(&wire, "x-other"), None);
	}
}
