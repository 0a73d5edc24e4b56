use bytes::Bytes;
use courier_types::proto::{
	MessageType, WebSocketMessage, WebSocketRequestMessage, WebSocketResponseMessage,
};
use http::StatusCode;
use prost::Message;

use crate::error::Error;

/// A validated inbound frame: either a server-initiated request or a
/// response to one of ours.
#[derive(Debug)]
pub(crate) enum ChatFrame {
	Request(WebSocketRequestMessage),
	Response(u64, WebSocketResponseMessage),
}

/// Decode a binary frame, insisting that the envelope type and the
/// populated sub-message agree.
pub(crate) fn decode_frame(data: &[u8]) -> Result<ChatFrame, Error> {
	let message = WebSocketMessage::decode(data)
		.map_err(|e| Error::transport(format!("undecodable frame: {e}")))?;
	match (message.r#type(), message.request, message.response) {
		(MessageType::Request, Some(request), None) => Ok(ChatFrame::Request(request)),
		(MessageType::Response, None, Some(response)) => {
			let id = response
				.id
				.ok_or_else(|| Error::transport("response frame without request id"))?;
			Ok(ChatFrame::Response(id, response))
		}
		_ => Err(Error::transport("frame is neither request nor response")),
	}
}

pub(crate) fn request_frame(request: WebSocketRequestMessage) -> Bytes {
	let message = WebSocketMessage {
		r#type: Some(MessageType::Request as i32),
		request: Some(request),
		response: None,
	};
	Bytes::from(message.encode_to_vec())
}

/// The acknowledgement frame for a server-initiated request.
pub(crate) fn ack_frame(request_id: u64, status: StatusCode, message: &str) -> Bytes {
	let envelope = WebSocketMessage {
		r#type: Some(MessageType::Response as i32),
		request: None,
		response: Some(WebSocketResponseMessage {
			id: Some(request_id),
			status: Some(status.as_u16().into()),
			message: Some(message.to_string()),
			body: None,
			headers: Vec::new(),
		}),
	};
	Bytes::from(envelope.encode_to_vec())
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn decodes_request_frames() {
		let frame = request_frame(WebSocketRequestMessage {
			verb: Some("PUT".to_string()),
			path: Some("/api/v1/message".to_string()),
			body: None,
			id: Some(7),
			headers: Vec::new(),
		});
		assert_matches!(
			decode_frame(&frame),
			Ok(ChatFrame::Request(request)) if request.id == Some(7)
		);
	}

	#[test]
	fn decodes_ack_frames_as_responses() {
		let frame = ack_frame(42, StatusCode::OK, "OK");
		let (id, response) = assert_matches!(
			decode_frame(&frame),
			Ok(ChatFrame::Response(id, response)) => (id, response)
		);
		assert_eq!(id, 42);
		assert_eq!(response.status, Some(200));
		assert_eq!(response.message.as_deref(), Some("OK"));
	}

	#[test]
	fn rejects_mismatched_envelopes() {
		// a request envelope with no request payload
		let bad = WebSocketMessage {
			r#type: Some(MessageType::Request as i32),
			request: None,
			response: None,
		};
		assert_matches!(decode_frame(&bad.encode_to_vec()), Err(Error::Transport(_)));
		assert_matches!(decode_frame(b"not protobuf"), Err(Error::Transport(_)));
	}

	#[test]
	fn rejects_responses_without_ids() {
		let bad = WebSocketMessage {
			r#type: Some(MessageType::Response as i32),
			request: None,
			response: Some(WebSocketResponseMessage {
				id: None,
				status: Some(200),
				message: None,
				body: None,
				headers: Vec::new(),
			}),
		};
		assert_matches!(decode_frame(&bad.encode_to_vec()), Err(Error::Transport(_)));
	}
}
