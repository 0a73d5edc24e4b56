use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

/// Which socket an envelope arrived on. Sealed-sender envelopes come in
/// on the unidentified socket and the processor treats them
/// differently, so the distinction stays visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeSource {
	WebsocketIdentified,
	WebsocketUnidentified,
}

/// A processing failure, classified by whether the server should still
/// see an acknowledgement (an un-acked envelope is redelivered).
#[derive(Debug)]
pub struct EnvelopeError {
	pub message: String,
	pub should_ack: bool,
}

/// The encrypted-envelope pipeline. Opaque to this crate; decryption
/// and persistence live behind this seam.
#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
	async fn process_envelope(
		&self,
		envelope: Bytes,
		server_delivery_timestamp: DateTime<Utc>,
		source: EnvelopeSource,
	) -> Result<(), EnvelopeError>;

	/// Wait for internal pipelines to drain. The queue-empty latch is
	/// only set once this returns, so consumers of the latch observe
	/// every message that preceded the queue-empty signal.
	async fn flush(&self) {}
}

enum Job {
	Envelope {
		envelope: Bytes,
		timestamp: DateTime<Utc>,
		source: EnvelopeSource,
		completion: oneshot::Sender<bool>,
	},
	Flush {
		completion: oneshot::Sender<()>,
	},
}

/// A single-threaded processing queue, shared by the identified and
/// unidentified connections so envelopes are processed in one serial
/// order. Completions hop back to the submitting controller's queue.
#[derive(Clone)]
pub struct ProcessingQueue {
	job_tx: mpsc::UnboundedSender<Job>,
}

impl ProcessingQueue {
	pub fn spawn(processor: Arc<dyn MessageProcessor>) -> Self {
		let (job_tx, mut job_rx) = mpsc::unbounded_channel();
		tokio::spawn(async move {
			while let Some(job) = job_rx.recv().await {
				match job {
					Job::Envelope {
						envelope,
						timestamp,
						source,
						completion,
					} => {
						let should_ack = match processor
							.process_envelope(envelope, timestamp, source)
							.await
						{
							Ok(()) => true,
							Err(e) => {
								log::error!("envelope processing failed: {}", e.message);
								e.should_ack
							}
						};
						let _ = completion.send(should_ack);
					}
					Job::Flush { completion } => {
						processor.flush().await;
						let _ = completion.send(());
					}
				}
			}
		});
		Self { job_tx }
	}

	/// Returns a receiver resolving to whether the envelope should be
	/// acked. A dropped receiver means the queue went away; callers
	/// treat that as "do not ack".
	pub(crate) fn submit_envelope(
		&self,
		envelope: Bytes,
		timestamp: DateTime<Utc>,
		source: EnvelopeSource,
	) -> oneshot::Receiver<bool> {
		let (completion, rx) = oneshot::channel();
		let _ = self.job_tx.send(Job::Envelope {
			envelope,
			timestamp,
			source,
			completion,
		});
		rx
	}

	pub(crate) fn submit_flush(&self) -> oneshot::Receiver<()> {
		let (completion, rx) = oneshot::channel();
		let _ = self.job_tx.send(Job::Flush { completion });
		rx
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;

	struct Recorder {
		processed: Mutex<Vec<(Bytes, EnvelopeSource)>>,
		flushed: Mutex<u32>,
	}

	#[async_trait]
	impl MessageProcessor for Recorder {
		async fn process_envelope(
			&self,
			envelope: Bytes,
			_server_delivery_timestamp: DateTime<Utc>,
			source: EnvelopeSource,
		) -> Result<(), EnvelopeError> {
			self.processed.lock().unwrap().push((envelope, source));
			Ok(())
		}

		async fn flush(&self) {
			*self.flushed.lock().unwrap() += 1;
		}
	}

	#[tokio::test]
	async fn jobs_run_in_submission_order() {
		let recorder = Arc::new(Recorder {
			processed: Mutex::new(Vec::new()),
			flushed: Mutex::new(0),
		});
		let queue = ProcessingQueue::spawn(recorder.clone());

		let first = queue.submit_envelope(
			Bytes::from_static(b"a"),
			DateTime::UNIX_EPOCH,
			EnvelopeSource::WebsocketIdentified,
		);
		let second = queue.submit_envelope(
			Bytes::from_static(b"b"),
			DateTime::UNIX_EPOCH,
			EnvelopeSource::WebsocketUnidentified,
		);
		let flushed = queue.submit_flush();

		assert!(first.await.unwrap());
		assert!(second.await.unwrap());
		flushed.await.unwrap();

		let processed = recorder.processed.lock().unwrap();
		assert_eq!(processed.len(), 2);
		assert_eq!(processed[0].0.as_ref(), b"a");
		assert_eq!(processed[1].1, EnvelopeSource::WebsocketUnidentified);
		assert_eq!(*recorder.flushed.lock().unwrap(), 1);
	}

	#[tokio::test]
	async fn no_ack_errors_suppress_the_ack() {
		struct Rejecting;

		#[async_trait]
		impl MessageProcessor for Rejecting {
			async fn process_envelope(
				&self,
				_envelope: Bytes,
				_server_delivery_timestamp: DateTime<Utc>,
				_source: EnvelopeSource,
			) -> Result<(), EnvelopeError> {
				Err(EnvelopeError {
					message: "database unavailable".to_string(),
					should_ack: false,
				})
			}
		}

		let queue = ProcessingQueue::spawn(Arc::new(Rejecting));
		let should_ack = queue
			.submit_envelope(
				Bytes::from_static(b"x"),
				DateTime::UNIX_EPOCH,
				EnvelopeSource::WebsocketIdentified,
			)
			.await
			.unwrap();
		assert!(!should_ack);
	}
}
