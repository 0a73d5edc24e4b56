use std::time::Duration;

use courier_types::auth::ServerCredentials;

use crate::consts::{
	CONNECT_TIMEOUT, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_USER_AGENT, HEARTBEAT_INTERVAL,
	RECONNECT_DELAY, REQUEST_TIMEOUT,
};

/// Which of the two parallel chat sockets a connection is.
///
/// The identified socket authenticates with server credentials in the
/// connect URL; the unidentified one is anonymous and carries
/// sealed-sender traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
	Identified,
	Unidentified,
}

impl ConnectionKind {
	pub fn is_identified(self) -> bool {
		matches!(self, ConnectionKind::Identified)
	}
}

/// Configuration for one chat connection.
pub struct ChatConfig {
	pub(crate) endpoint: String,
	pub(crate) credentials: Option<ServerCredentials>,
	pub(crate) user_agent: String,
	pub(crate) accept_language: String,
	pub(crate) extra_connect_headers: Vec<(String, String)>,
	/// Whether this process is allowed to hold chat sockets at all
	/// (extensions generally are not).
	pub(crate) socket_capable: bool,
	pub(crate) heartbeat_interval: Duration,
	pub(crate) reconnect_delay: Duration,
	pub(crate) connect_timeout: Duration,
	pub(crate) request_timeout: Duration,
}

impl ChatConfig {
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
			credentials: None,
			user_agent: DEFAULT_USER_AGENT.to_string(),
			accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
			extra_connect_headers: Vec::new(),
			socket_capable: true,
			heartbeat_interval: HEARTBEAT_INTERVAL,
			reconnect_delay: RECONNECT_DELAY,
			connect_timeout: CONNECT_TIMEOUT,
			request_timeout: REQUEST_TIMEOUT,
		}
	}

	pub fn with_credentials(mut self, credentials: ServerCredentials) -> Self {
		self.credentials = Some(credentials);
		self
	}

	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = user_agent.into();
		self
	}

	pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
		self.accept_language = accept_language.into();
		self
	}

	/// Extra headers sent with the WebSocket upgrade request, e.g. the
	/// stories opt-in header on the identified socket.
	pub fn with_connect_header(
		mut self,
		name: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.extra_connect_headers.push((name.into(), value.into()));
		self
	}

	pub fn with_socket_capable(mut self, socket_capable: bool) -> Self {
		self.socket_capable = socket_capable;
		self
	}

	pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
		self.heartbeat_interval = interval;
		self
	}

	pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
		self.reconnect_delay = delay;
		self
	}

	pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}
}
