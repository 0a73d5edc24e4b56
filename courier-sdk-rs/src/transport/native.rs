use bytes::Bytes;
use courier_types::auth::ServerCredentials;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tungstenite::{ClientRequestBuilder, Message};

use crate::config::{ChatConfig, ConnectionKind};
use crate::consts::WEBSOCKET_PATH;
use crate::error::Error;
use crate::transport::{DisconnectReason, Transport, TransportEvent, TransportEventSink, TransportFactory};

/// Production transport over `tokio-tungstenite`.
///
/// `build` spawns one task per socket that performs the connect, pumps
/// inbound frames into the controller queue, and writes outbound
/// commands. Dropping the handle (or calling `close`) ends the task.
pub struct NativeTransportFactory {
	endpoint: String,
	credentials: Option<ServerCredentials>,
	extra_headers: Vec<(String, String)>,
	user_agent: String,
}

impl NativeTransportFactory {
	pub fn new(config: &ChatConfig) -> Self {
		Self {
			endpoint: config.endpoint.clone(),
			credentials: config.credentials.clone(),
			extra_headers: config.extra_connect_headers.clone(),
			user_agent: config.user_agent.clone(),
		}
	}

	fn connect_request(&self, kind: ConnectionKind) -> Result<ClientRequestBuilder, Error> {
		let mut url = format!("{}{}", self.endpoint.trim_end_matches('/'), WEBSOCKET_PATH);
		if kind.is_identified() {
			let credentials = self.credentials.as_ref().ok_or_else(|| {
				Error::transport("identified connection configured without credentials")
			})?;
			url.push_str(&format!(
				"?login={}&password={}",
				urlencoding::encode(&credentials.username),
				urlencoding::encode(&credentials.password),
			));
		}
		let uri: tungstenite::http::Uri = url
			.parse()
			.map_err(|e| Error::transport(format!("invalid chat endpoint: {e}")))?;

		let mut request =
			ClientRequestBuilder::new(uri).with_header("User-Agent", self.user_agent.as_str());
		for (name, value) in &self.extra_headers {
			request = request.with_header(name.as_str(), value.as_str());
		}
		Ok(request)
	}
}

impl TransportFactory for NativeTransportFactory {
	fn build(
		&self,
		kind: ConnectionKind,
		events: TransportEventSink,
	) -> Result<Box<dyn Transport>, Error> {
		let request = self.connect_request(kind)?;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		tokio::spawn(run_socket(request, events, outbound_rx));
		Ok(Box::new(NativeTransport { outbound_tx }))
	}
}

enum Outbound {
	Frame(Bytes),
	Ping,
	Close,
}

struct NativeTransport {
	outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for NativeTransport {
	fn send_binary(&self, frame: Bytes) -> Result<(), Error> {
		self.outbound_tx
			.send(Outbound::Frame(frame))
			.map_err(|_| Error::transport("socket is closed"))
	}

	fn write_ping(&self) -> Result<(), Error> {
		self.outbound_tx
			.send(Outbound::Ping)
			.map_err(|_| Error::transport("socket is closed"))
	}

	fn close(&self) {
		let _ = self.outbound_tx.send(Outbound::Close);
	}
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_socket(
	request: ClientRequestBuilder,
	events: TransportEventSink,
	mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
	let mut socket: Socket = match tokio_tungstenite::connect_async(request).await {
		Ok((socket, _response)) => socket,
		Err(e) => {
			events.send(TransportEvent::Disconnected(disconnect_reason(e)));
			return;
		}
	};
	events.send(TransportEvent::Connected);

	loop {
		tokio::select! {
			biased;
			command = outbound_rx.recv() => {
				match command {
					None | Some(Outbound::Close) => {
						let _ = socket.close(None).await;
						return;
					}
					Some(Outbound::Frame(frame)) => {
						if let Err(e) = socket.send(Message::Binary(frame)).await {
							events.send(TransportEvent::Disconnected(disconnect_reason(e)));
							return;
						}
					}
					Some(Outbound::Ping) => {
						if let Err(e) = socket.send(Message::Ping(Bytes::new())).await {
							events.send(TransportEvent::Disconnected(disconnect_reason(e)));
							return;
						}
					}
				}
			}
			message = socket.next() => {
				match message {
					None | Some(Ok(Message::Close(_))) => {
						events.send(TransportEvent::Disconnected(DisconnectReason::Closed));
						return;
					}
					Some(Ok(Message::Binary(data))) => {
						events.send(TransportEvent::Frame(data));
					}
					Some(Ok(Message::Text(_))) => {
						// the chat protocol is binary-only
						log::warn!("ignoring text frame on chat socket");
					}
					// pings and pongs are handled by the library
					Some(Ok(_)) => {}
					Some(Err(e)) => {
						events.send(TransportEvent::Disconnected(disconnect_reason(e)));
						return;
					}
				}
			}
		}
	}
}

fn disconnect_reason(error: tungstenite::Error) -> DisconnectReason {
	match error {
		tungstenite::Error::Http(response) => DisconnectReason::UpgradeFailed(response.status()),
		tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
			DisconnectReason::Closed
		}
		other => DisconnectReason::Failed(other.to_string()),
	}
}
