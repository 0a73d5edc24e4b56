//! Shared test harness: a scripted in-memory transport standing in for
//! the WebSocket, a recording message processor, and recording hook
//! implementations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_sdk_rs::config::ConnectionKind;
use courier_sdk_rs::error::Error;
use courier_sdk_rs::hooks::{
	BackgroundActivityGuard, BackgroundActivityHooks, OutageHooks, RegistrationHooks,
};
use courier_sdk_rs::processor::{EnvelopeError, EnvelopeSource, MessageProcessor};
use courier_sdk_rs::transport::{
	DisconnectReason, Transport, TransportEvent, TransportEventSink, TransportFactory,
};
use courier_types::proto::{
	MessageType, WebSocketMessage, WebSocketRequestMessage, WebSocketResponseMessage,
};
use prost::Message;
use tokio::sync::Notify;

pub fn init_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// One scripted socket. The connection manager talks to it like a real
/// WebSocket; the test drives the server side by pushing events through
/// the sink the factory was handed.
pub struct ScriptedConnection {
	kind: ConnectionKind,
	events: TransportEventSink,
	sent: Mutex<VecDeque<Bytes>>,
	sent_notify: Notify,
	pings: AtomicU32,
	closed: AtomicBool,
}

impl ScriptedConnection {
	pub fn kind(&self) -> ConnectionKind {
		self.kind
	}

	/// Complete the connect attempt.
	pub fn connect(&self) {
		self.events.send(TransportEvent::Connected);
	}

	pub fn disconnect(&self, reason: DisconnectReason) {
		self.events.send(TransportEvent::Disconnected(reason));
	}

	/// Deliver a raw binary frame from the server.
	pub fn push_frame(&self, frame: Bytes) {
		self.events.send(TransportEvent::Frame(frame));
	}

	/// Deliver a server-initiated request frame.
	pub fn push_server_request(
		&self,
		verb: &str,
		path: &str,
		request_id: u64,
		headers: Vec<String>,
		body: Option<&[u8]>,
	) {
		let message = WebSocketMessage {
			r#type: Some(MessageType::Request as i32),
			request: Some(WebSocketRequestMessage {
				verb: Some(verb.to_string()),
				path: Some(path.to_string()),
				body: body.map(|b| b.to_vec()),
				id: Some(request_id),
				headers,
			}),
			response: None,
		};
		self.push_frame(Bytes::from(message.encode_to_vec()));
	}

	/// Deliver a response frame for one of the client's requests.
	pub fn push_response(&self, request_id: u64, status: u32, body: Option<&[u8]>) {
		let message = WebSocketMessage {
			r#type: Some(MessageType::Response as i32),
			request: None,
			response: Some(WebSocketResponseMessage {
				id: Some(request_id),
				status: Some(status),
				message: None,
				body: body.map(|b| b.to_vec()),
				headers: Vec::new(),
			}),
		};
		self.push_frame(Bytes::from(message.encode_to_vec()));
	}

	/// The next frame the client wrote, decoded.
	pub async fn next_sent_frame(&self) -> WebSocketMessage {
		loop {
			if let Some(frame) = self.try_next_sent_frame() {
				return frame;
			}
			self.sent_notify.notified().await;
		}
	}

	/// The next written frame if one is already buffered.
	pub fn try_next_sent_frame(&self) -> Option<WebSocketMessage> {
		let frame = self.sent.lock().unwrap().pop_front()?;
		Some(WebSocketMessage::decode(frame.as_ref()).expect("client frame decodes"))
	}

	pub fn ping_count(&self) -> u32 {
		self.pings.load(Ordering::Relaxed)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Relaxed)
	}
}

struct ScriptedTransport {
	connection: Arc<ScriptedConnection>,
}

impl Transport for ScriptedTransport {
	fn send_binary(&self, frame: Bytes) -> Result<(), Error> {
		if self.connection.is_closed() {
			return Err(Error::Transport("scripted socket is closed".to_string()));
		}
		self.connection.sent.lock().unwrap().push_back(frame);
		self.connection.sent_notify.notify_one();
		Ok(())
	}

	fn write_ping(&self) -> Result<(), Error> {
		if self.connection.is_closed() {
			return Err(Error::Transport("scripted socket is closed".to_string()));
		}
		self.connection.pings.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	fn close(&self) {
		self.connection.closed.store(true, Ordering::Relaxed);
	}
}

/// Hands out [`ScriptedConnection`]s in the order the controller builds
/// them.
pub struct ScriptedTransportFactory {
	can_build: AtomicBool,
	built: Mutex<VecDeque<Arc<ScriptedConnection>>>,
	built_count: AtomicU32,
	built_notify: Notify,
}

impl ScriptedTransportFactory {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			can_build: AtomicBool::new(true),
			built: Mutex::new(VecDeque::new()),
			built_count: AtomicU32::new(0),
			built_notify: Notify::new(),
		})
	}

	pub fn set_can_build(&self, can_build: bool) {
		self.can_build.store(can_build, Ordering::Relaxed);
	}

	/// Wait for the controller's next connection attempt.
	pub async fn next_connection(&self) -> Arc<ScriptedConnection> {
		loop {
			if let Some(connection) = self.built.lock().unwrap().pop_front() {
				return connection;
			}
			self.built_notify.notified().await;
		}
	}

	pub fn connection_count(&self) -> u32 {
		self.built_count.load(Ordering::Relaxed)
	}
}

impl TransportFactory for ScriptedTransportFactory {
	fn can_build(&self) -> bool {
		self.can_build.load(Ordering::Relaxed)
	}

	fn build(
		&self,
		kind: ConnectionKind,
		events: TransportEventSink,
	) -> Result<Box<dyn Transport>, Error> {
		let connection = Arc::new(ScriptedConnection {
			kind,
			events,
			sent: Mutex::new(VecDeque::new()),
			sent_notify: Notify::new(),
			pings: AtomicU32::new(0),
			closed: AtomicBool::new(false),
		});
		self.built.lock().unwrap().push_back(connection.clone());
		self.built_count.fetch_add(1, Ordering::Relaxed);
		self.built_notify.notify_one();
		Ok(Box::new(ScriptedTransport { connection }))
	}
}

#[derive(Debug, Clone)]
pub struct RecordedEnvelope {
	pub envelope: Bytes,
	pub timestamp: DateTime<Utc>,
	pub source: EnvelopeSource,
}

/// Records every envelope; acks unless told otherwise.
#[derive(Default)]
pub struct RecordingProcessor {
	envelopes: Mutex<Vec<RecordedEnvelope>>,
	reject_without_ack: AtomicBool,
	flushes: AtomicU32,
}

impl RecordingProcessor {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Make subsequent envelopes fail with a "do not ack" error.
	pub fn reject_without_ack(&self, reject: bool) {
		self.reject_without_ack.store(reject, Ordering::Relaxed);
	}

	pub fn envelopes(&self) -> Vec<RecordedEnvelope> {
		self.envelopes.lock().unwrap().clone()
	}

	pub fn flush_count(&self) -> u32 {
		self.flushes.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl MessageProcessor for RecordingProcessor {
	async fn process_envelope(
		&self,
		envelope: Bytes,
		server_delivery_timestamp: DateTime<Utc>,
		source: EnvelopeSource,
	) -> Result<(), EnvelopeError> {
		self.envelopes.lock().unwrap().push(RecordedEnvelope {
			envelope,
			timestamp: server_delivery_timestamp,
			source,
		});
		if self.reject_without_ack.load(Ordering::Relaxed) {
			Err(EnvelopeError {
				message: "scripted processing failure".to_string(),
				should_ack: false,
			})
		} else {
			Ok(())
		}
	}

	async fn flush(&self) {
		self.flushes.fetch_add(1, Ordering::Relaxed);
	}
}

/// Records `set_deregistered` calls.
#[derive(Default)]
pub struct RecordingRegistration {
	history: Mutex<Vec<bool>>,
}

impl RecordingRegistration {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn last_deregistered(&self) -> Option<bool> {
		self.history.lock().unwrap().last().copied()
	}

	pub fn history(&self) -> Vec<bool> {
		self.history.lock().unwrap().clone()
	}
}

impl RegistrationHooks for RecordingRegistration {
	fn set_deregistered(&self, deregistered: bool) {
		self.history.lock().unwrap().push(deregistered);
	}
}

/// Counts connection-level outcomes.
#[derive(Default)]
pub struct RecordingOutage {
	successes: AtomicU32,
	failures: AtomicU32,
}

impl RecordingOutage {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn successes(&self) -> u32 {
		self.successes.load(Ordering::Relaxed)
	}

	pub fn failures(&self) -> u32 {
		self.failures.load(Ordering::Relaxed)
	}
}

impl OutageHooks for RecordingOutage {
	fn connection_succeeded(&self) {
		self.successes.fetch_add(1, Ordering::Relaxed);
	}

	fn connection_failed(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}
}

/// Counts currently-held background activity guards.
#[derive(Default)]
pub struct RecordingBackground {
	active: Arc<AtomicI32>,
}

impl RecordingBackground {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn active_count(&self) -> i32 {
		self.active.load(Ordering::Relaxed)
	}
}

struct ActiveGuard(Arc<AtomicI32>);

impl Drop for ActiveGuard {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::Relaxed);
	}
}

impl BackgroundActivityHooks for RecordingBackground {
	fn begin_activity(&self, _label: &'static str) -> BackgroundActivityGuard {
		self.active.fetch_add(1, Ordering::Relaxed);
		BackgroundActivityGuard::new(Box::new(ActiveGuard(self.active.clone())))
	}
}
