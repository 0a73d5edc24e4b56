use std::time::Duration;

use tokio::time::Instant;

/// Why the socket has permission to stay open in the background.
///
/// Each reason carries a fixed extension window measured from the
/// moment the reason occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveReason {
	/// A push notification arrived; give the socket time to connect
	/// and drain whatever prompted it.
	DidReceivePush,
	/// A message arrived on the socket.
	ReceiveMessage,
	/// A response to one of our requests arrived.
	ReceiveResponse,
}

impl KeepAliveReason {
	pub(crate) fn window(self) -> Duration {
		match self {
			KeepAliveReason::DidReceivePush => Duration::from_secs(20),
			KeepAliveReason::ReceiveMessage => Duration::from_secs(15),
			KeepAliveReason::ReceiveResponse => Duration::from_secs(5),
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BackgroundKeepAlive {
	pub reason: KeepAliveReason,
	pub until: Instant,
}

/// At most one keep-alive is active; a new reason only replaces the
/// current one when its deadline strictly extends it.
#[derive(Debug, Default)]
pub(crate) struct KeepAliveRecord {
	current: Option<BackgroundKeepAlive>,
}

impl KeepAliveRecord {
	/// Returns whether the record changed.
	pub fn extend(&mut self, reason: KeepAliveReason, now: Instant) -> bool {
		let until = now + reason.window();
		match self.current {
			Some(existing) if existing.until >= until => false,
			_ => {
				self.current = Some(BackgroundKeepAlive { reason, until });
				true
			}
		}
	}

	pub fn is_active(&self, now: Instant) -> bool {
		self.current.is_some_and(|keep_alive| keep_alive.until > now)
	}

	pub fn current(&self) -> Option<BackgroundKeepAlive> {
		self.current
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_strictly_later_deadlines_replace() {
		let now = Instant::now();
		let mut record = KeepAliveRecord::default();

		assert!(record.extend(KeepAliveReason::DidReceivePush, now));
		// 15s from now loses to the 20s window already in place
		assert!(!record.extend(KeepAliveReason::ReceiveMessage, now));
		assert_eq!(
			record.current().unwrap().reason,
			KeepAliveReason::DidReceivePush
		);

		// 6s later, 15s from now beats the remaining 14s
		let later = now + Duration::from_secs(6);
		assert!(record.extend(KeepAliveReason::ReceiveMessage, later));
		assert_eq!(
			record.current().unwrap().reason,
			KeepAliveReason::ReceiveMessage
		);
	}

	#[test]
	fn expires_at_the_deadline() {
		let now = Instant::now();
		let mut record = KeepAliveRecord::default();
		assert!(!record.is_active(now));

		record.extend(KeepAliveReason::ReceiveResponse, now);
		assert!(record.is_active(now + Duration::from_secs(4)));
		assert!(!record.is_active(now + Duration::from_secs(5)));
	}
}
