//! Chat sub-protocol framing.
//!
//! Every frame on the chat WebSocket is a binary-encoded
//! [`WebSocketMessage`] carrying either a request or a response. The
//! field tags match the server's protobuf schema and must not change.

/// An RPC-style request framed inside the WebSocket, sent in either
/// direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WebSocketRequestMessage {
	#[prost(string, optional, tag = "1")]
	pub verb: Option<String>,
	#[prost(string, optional, tag = "2")]
	pub path: Option<String>,
	#[prost(bytes = "vec", optional, tag = "3")]
	pub body: Option<Vec<u8>>,
	#[prost(uint64, optional, tag = "4")]
	pub id: Option<u64>,
	/// Headers as `"Name:Value"` strings.
	#[prost(string, repeated, tag = "5")]
	pub headers: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WebSocketResponseMessage {
	#[prost(uint64, optional, tag = "1")]
	pub id: Option<u64>,
	#[prost(uint32, optional, tag = "2")]
	pub status: Option<u32>,
	#[prost(string, optional, tag = "3")]
	pub message: Option<String>,
	#[prost(bytes = "vec", optional, tag = "4")]
	pub body: Option<Vec<u8>>,
	#[prost(string, repeated, tag = "5")]
	pub headers: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WebSocketMessage {
	#[prost(enumeration = "MessageType", optional, tag = "1")]
	pub r#type: Option<i32>,
	#[prost(message, optional, tag = "2")]
	pub request: Option<WebSocketRequestMessage>,
	#[prost(message, optional, tag = "3")]
	pub response: Option<WebSocketResponseMessage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
	Unknown = 0,
	Request = 1,
	Response = 2,
}

#[cfg(test)]
mod tests {
	use prost::Message;

	use super::*;

	#[test]
	fn frame_round_trips_through_protobuf() {
		let frame = WebSocketMessage {
			r#type: Some(MessageType::Request as i32),
			request: Some(WebSocketRequestMessage {
				verb: Some("PUT".to_string()),
				path: Some("/api/v1/message".to_string()),
				body: Some(b"envelope".to_vec()),
				id: Some(0x1234_5678_9abc_def0),
				headers: vec!["x-signal-timestamp:1700000000000".to_string()],
			}),
			response: None,
		};

		let decoded = WebSocketMessage::decode(frame.encode_to_vec().as_slice()).unwrap();
		assert_eq!(decoded, frame);
		assert_eq!(decoded.r#type(), MessageType::Request);
	}

	#[test]
	fn unknown_enum_values_decode_as_unknown() {
		let frame = WebSocketMessage {
			r#type: Some(17),
			request: None,
			response: None,
		};
		let decoded = WebSocketMessage::decode(frame.encode_to_vec().as_slice()).unwrap();
		assert_eq!(decoded.r#type(), MessageType::Unknown);
	}
}
