use bytes::Bytes;
use http::StatusCode;
use tokio::sync::mpsc;

use crate::config::ConnectionKind;
use crate::controller::Work;
use crate::error::Error;

mod native;

pub use native::NativeTransportFactory;

/// What a live transport reports back to its controller. Events for one
/// transport arrive on the controller queue in the order they occurred.
#[derive(Debug)]
pub enum TransportEvent {
	Connected,
	Frame(Bytes),
	Disconnected(DisconnectReason),
}

#[derive(Debug)]
pub enum DisconnectReason {
	/// The server rejected the WebSocket upgrade with an HTTP status
	/// (403 on the identified socket means the credentials are dead).
	UpgradeFailed(StatusCode),
	/// The peer closed the connection or the stream ended.
	Closed,
	Failed(String),
}

/// Delivers transport events into the owning controller's work queue,
/// tagged with the instance they belong to so events from a superseded
/// socket are ignored.
pub struct TransportEventSink {
	pub(crate) instance_id: u64,
	pub(crate) work_tx: mpsc::UnboundedSender<Work>,
}

impl TransportEventSink {
	pub fn send(&self, event: TransportEvent) {
		// a closed queue means the controller is gone; nothing to do
		let _ = self.work_tx.send(Work::Transport {
			instance_id: self.instance_id,
			event,
		});
	}
}

/// Handle to one WebSocket. Sends are fire-and-forget into the socket
/// task; once the socket is closed they fail fast.
pub trait Transport: Send {
	fn send_binary(&self, frame: Bytes) -> Result<(), Error>;
	fn write_ping(&self) -> Result<(), Error>;
	fn close(&self);
}

pub trait TransportFactory: Send + Sync {
	/// Whether a socket could currently be built at all (e.g. a
	/// required proxy is not ready). Consulted by the desired-state
	/// policy.
	fn can_build(&self) -> bool {
		true
	}

	/// Start a connection attempt. The returned handle is usable
	/// immediately; `Connected` (or `Disconnected`) arrives through
	/// `events` once the attempt resolves.
	fn build(
		&self,
		kind: ConnectionKind,
		events: TransportEventSink,
	) -> Result<Box<dyn Transport>, Error>;
}
