use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Externally observable connection state.
///
/// Within one connection instance the progression is
/// `Closed → Connecting → Open`; a replacement instance starts over at
/// `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibleState {
	Closed,
	Connecting,
	Open,
}

/// Publishes visible-state transitions and parks `await_open` callers.
///
/// The waiter map and the current state share one short critical
/// section so a waiter can never be registered "between" a transition
/// and its resumption sweep.
pub(crate) struct StateObserver {
	inner: Mutex<ObserverInner>,
	watch_tx: watch::Sender<VisibleState>,
}

struct ObserverInner {
	current: VisibleState,
	next_waiter_id: u64,
	waiters: HashMap<u64, oneshot::Sender<()>>,
}

impl StateObserver {
	pub fn new() -> Self {
		let (watch_tx, _) = watch::channel(VisibleState::Closed);
		Self {
			inner: Mutex::new(ObserverInner {
				current: VisibleState::Closed,
				next_waiter_id: 0,
				waiters: HashMap::new(),
			}),
			watch_tx,
		}
	}

	pub fn current(&self) -> VisibleState {
		self.lock_inner().current
	}

	fn lock_inner(&self) -> std::sync::MutexGuard<'_, ObserverInner> {
		self.inner
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn subscribe(&self) -> watch::Receiver<VisibleState> {
		self.watch_tx.subscribe()
	}

	/// Record a transition. Waiters are resumed while the lock is held
	/// (a oneshot send only wakes the waiting task, it runs no caller
	/// code); the broadcast happens outside it.
	pub fn publish(&self, state: VisibleState) {
		{
			let mut inner = self.lock_inner();
			if inner.current == state {
				return;
			}
			inner.current = state;
			if state == VisibleState::Open {
				for (_, waiter) in inner.waiters.drain() {
					let _ = waiter.send(());
				}
			}
		}
		self.watch_tx.send_replace(state);
	}

	/// Re-announce the current state without a transition, used when a
	/// latch the subscribers care about flips.
	pub fn reannounce(&self) {
		let current = self.lock_inner().current;
		self.watch_tx.send_replace(current);
	}

	/// Fail every parked waiter. Called when the controller goes away
	/// for good; the dropped senders surface as transport errors.
	pub fn shutdown(&self) {
		self.lock_inner().waiters.clear();
	}

	/// Wait until the connection reports `Open`.
	///
	/// Cancelling through `cancel` completes with [`Error::Cancelled`]
	/// exactly once and leaks no waiter; a transition to `Open` that
	/// races the cancellation wins.
	pub async fn await_open(&self, cancel: &CancellationToken) -> Result<(), Error> {
		let (id, mut rx) = {
			let mut inner = self.lock_inner();
			if inner.current == VisibleState::Open {
				return Ok(());
			}
			let id = inner.next_waiter_id;
			inner.next_waiter_id += 1;
			let (tx, rx) = oneshot::channel();
			inner.waiters.insert(id, tx);
			(id, rx)
		};

		tokio::select! {
			biased;
			resumed = &mut rx => match resumed {
				Ok(()) => Ok(()),
				Err(_) => Err(Error::transport("chat connection shut down")),
			},
			_ = cancel.cancelled() => {
				let removed = self.lock_inner().waiters.remove(&id).is_some();
				if removed {
					Err(Error::Cancelled)
				} else {
					// the Open sweep got to us first
					match rx.try_recv() {
						Ok(()) => Ok(()),
						Err(_) => Err(Error::transport("chat connection shut down")),
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[tokio::test]
	async fn await_open_returns_immediately_when_open() {
		let observer = StateObserver::new();
		observer.publish(VisibleState::Open);
		let cancel = CancellationToken::new();
		assert_matches!(observer.await_open(&cancel).await, Ok(()));
	}

	#[tokio::test]
	async fn await_open_resumes_on_transition() {
		let observer = std::sync::Arc::new(StateObserver::new());
		let cancel = CancellationToken::new();

		let waiting = {
			let observer = observer.clone();
			tokio::spawn(async move { observer.await_open(&cancel).await })
		};
		tokio::task::yield_now().await;

		observer.publish(VisibleState::Connecting);
		observer.publish(VisibleState::Open);
		assert_matches!(waiting.await.unwrap(), Ok(()));
	}

	#[tokio::test]
	async fn cancellation_fails_exactly_once_and_leaks_no_waiter() {
		let observer = std::sync::Arc::new(StateObserver::new());
		let cancel = CancellationToken::new();

		let waiting = {
			let observer = observer.clone();
			let cancel = cancel.clone();
			tokio::spawn(async move { observer.await_open(&cancel).await })
		};
		tokio::task::yield_now().await;

		cancel.cancel();
		assert_matches!(waiting.await.unwrap(), Err(Error::Cancelled));
		assert!(observer.inner.lock().unwrap().waiters.is_empty());

		// a later transition must not trip over the cancelled waiter
		observer.publish(VisibleState::Open);
	}

	#[tokio::test]
	async fn publish_is_idempotent_for_watchers() {
		let observer = StateObserver::new();
		let mut rx = observer.subscribe();

		observer.publish(VisibleState::Connecting);
		rx.changed().await.unwrap();
		assert_eq!(*rx.borrow_and_update(), VisibleState::Connecting);

		// same state again: no new notification
		observer.publish(VisibleState::Connecting);
		assert!(!rx.has_changed().unwrap());
	}
}
