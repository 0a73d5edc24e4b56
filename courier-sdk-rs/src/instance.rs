use bytes::Bytes;

use crate::error::Error;
use crate::registry::RequestRegistry;
use crate::transport::Transport;

/// Lifecycle of one socket. `Disconnected` is terminal; a replacement
/// instance is created instead of reviving this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstanceState {
	Connecting,
	Open,
	Disconnected,
}

/// One live or connecting socket and the requests in flight on it.
///
/// The `id` distinguishes successive instances; callbacks and timer
/// firings carry it so anything belonging to a superseded instance is
/// ignored.
pub(crate) struct ConnectionInstance {
	pub id: u64,
	transport: Box<dyn Transport>,
	pub state: InstanceState,
	pub registry: RequestRegistry,
	pub has_connected: bool,
	pub has_emptied_initial_queue: bool,
}

impl ConnectionInstance {
	pub fn new(id: u64, transport: Box<dyn Transport>) -> Self {
		Self {
			id,
			transport,
			state: InstanceState::Connecting,
			registry: RequestRegistry::new(),
			has_connected: false,
			has_emptied_initial_queue: false,
		}
	}

	pub fn is_open(&self) -> bool {
		self.state == InstanceState::Open
	}

	pub fn is_disconnected(&self) -> bool {
		self.state == InstanceState::Disconnected
	}

	pub fn mark_connected(&mut self) {
		self.has_connected = true;
		self.state = InstanceState::Open;
	}

	pub fn mark_disconnected(&mut self) {
		self.state = InstanceState::Disconnected;
	}

	pub fn send_frame(&self, frame: Bytes) -> Result<(), Error> {
		self.transport.send_binary(frame)
	}

	pub fn write_ping(&self) -> Result<(), Error> {
		self.transport.write_ping()
	}

	/// Latch the queue-empty flag. Returns whether this was the first
	/// time; the flag never reverts within one instance.
	pub fn latch_queue_emptied(&mut self) -> bool {
		if self.has_emptied_initial_queue {
			false
		} else {
			self.has_emptied_initial_queue = true;
			true
		}
	}
}

impl Drop for ConnectionInstance {
	fn drop(&mut self) {
		self.transport.close();
		self.registry.drain_all();
	}
}
