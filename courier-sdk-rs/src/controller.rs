use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_types::proto::{WebSocketRequestMessage, WebSocketResponseMessage};
use http::StatusCode;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::{ChatConfig, ConnectionKind};
use crate::consts::{BACKGROUND_TICK, SERVER_MESSAGE_PATH, SERVER_QUEUE_EMPTY_PATH, TIMESTAMP_HEADER};
use crate::desired::{DesiredState, ObservedInputs, evaluate};
use crate::error::Error;
use crate::frames::{ChatFrame, ack_frame, decode_frame, request_frame};
use crate::hooks::{BackgroundActivityGuard, Hooks};
use crate::instance::ConnectionInstance;
use crate::keepalive::{KeepAliveRecord, KeepAliveReason};
use crate::observer::{StateObserver, VisibleState};
use crate::processor::{EnvelopeSource, ProcessingQueue};
use crate::registry::PendingRequest;
use crate::request::{ChatRequest, ChatResponse, RequestBody, wire_header_value};
use crate::transport::{DisconnectReason, TransportEvent, TransportEventSink, TransportFactory};

/// A claim on the socket: while a token exists the connection stays
/// open in anticipation of the request it stands for. Consumed by
/// [`ChatConnection::make_request`] or released with
/// [`ChatConnection::cancel_request_token`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

/// Everything a controller input can be. External callers post these
/// through the [`ChatConnection`] handle; timers and transports post
/// them from their own tasks. The controller task is the only consumer,
/// which is what serializes all connection state.
pub(crate) enum Work {
	AppBecameReady,
	ApplicationActive(bool),
	RegistrationChanged(bool),
	AppExpiryChanged(bool),
	ProxyReadyChanged(bool),
	CycleRequested(&'static str),
	PushReceived,
	Reconcile,
	Submit {
		request: ChatRequest,
		token: RequestToken,
		completion: oneshot::Sender<Result<ChatResponse, Error>>,
	},
	Transport {
		instance_id: u64,
		event: TransportEvent,
	},
	RequestTimedOut {
		instance_id: u64,
		request_id: u64,
	},
	EnvelopeProcessed {
		instance_id: u64,
		request_id: u64,
		should_ack: bool,
	},
	QueueFlushed {
		instance_id: u64,
	},
}

/// State shared between the handle and the controller task that must be
/// readable without a round-trip through the work queue: the
/// unsubmitted-token set (created synchronously on caller threads), the
/// expiry flag (pre-checked by `make_request`), and the last evaluated
/// desired state (diagnostics).
struct SharedInputs {
	next_token: AtomicU64,
	tokens: Mutex<HashSet<u64>>,
	app_expired: AtomicBool,
	last_desired: Mutex<Option<DesiredState>>,
}

impl SharedInputs {
	fn new() -> Self {
		Self {
			next_token: AtomicU64::new(0),
			tokens: Mutex::new(HashSet::new()),
			app_expired: AtomicBool::new(false),
			last_desired: Mutex::new(None),
		}
	}

	fn make_token(&self) -> u64 {
		let id = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
		self.tokens
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(id);
		id
	}

	fn remove_token(&self, id: u64) -> bool {
		self.tokens
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.remove(&id)
	}

	fn has_tokens(&self) -> bool {
		!self
			.tokens
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.is_empty()
	}
}

/// Handle to one logical chat connection. Cloneable; the controller
/// task exits when the last handle is dropped, failing any still
/// outstanding requests with `NetworkFailure`.
#[derive(Clone)]
pub struct ChatConnection {
	kind: ConnectionKind,
	work_tx: mpsc::UnboundedSender<Work>,
	shared: Arc<SharedInputs>,
	observer: Arc<StateObserver>,
	queue_empty_rx: watch::Receiver<bool>,
}

impl ChatConnection {
	/// Spawn the controller for one connection kind. The processing
	/// queue is shared between the identified and unidentified
	/// connections so envelopes from both drain in one serial order.
	pub fn spawn(
		config: ChatConfig,
		kind: ConnectionKind,
		factory: Arc<dyn TransportFactory>,
		processing: ProcessingQueue,
		hooks: Hooks,
	) -> Self {
		let (work_tx, work_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(SharedInputs::new());
		let observer = Arc::new(StateObserver::new());
		let (queue_empty_tx, queue_empty_rx) = watch::channel(false);

		let controller = Controller {
			kind,
			config,
			factory,
			processing,
			hooks,
			shared: shared.clone(),
			observer: observer.clone(),
			work_tx: work_tx.downgrade(),
			queue_empty_tx,
			app_ready: false,
			app_active: false,
			registered: false,
			app_expired: false,
			keep_alive: KeepAliveRecord::default(),
			current: None,
			next_instance_id: 0,
			heartbeat_at: None,
			reconnect_at: None,
			background_at: None,
			background_guard: None,
			connect_watchdog: None,
		};
		tokio::spawn(controller.run(work_rx));

		Self {
			kind,
			work_tx,
			shared,
			observer,
			queue_empty_rx,
		}
	}

	pub fn kind(&self) -> ConnectionKind {
		self.kind
	}

	pub fn state(&self) -> VisibleState {
		self.observer.current()
	}

	/// Watch channel delivering every visible-state transition.
	pub fn state_watch(&self) -> watch::Receiver<VisibleState> {
		self.observer.subscribe()
	}

	/// The most recently evaluated desired state, for diagnostics.
	pub fn last_desired_state(&self) -> Option<DesiredState> {
		*self
			.shared
			.last_desired
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Latches to `true` the first time the server reports the message
	/// backlog for the current connection instance as drained; resets
	/// when a replacement instance starts connecting.
	pub fn queue_empty_watch(&self) -> watch::Receiver<bool> {
		self.queue_empty_rx.clone()
	}

	pub fn has_emptied_initial_queue(&self) -> bool {
		*self.queue_empty_rx.borrow()
	}

	/// Wait until the connection is open. Honors `cancel`: a cancelled
	/// caller gets [`Error::Cancelled`] exactly once and is never
	/// resumed by a later transition.
	pub async fn await_open(&self, cancel: &CancellationToken) -> Result<(), Error> {
		self.observer.await_open(cancel).await
	}

	/// Declare the intent to submit a request soon. The token's
	/// existence alone forces the socket open.
	pub fn make_unsubmitted_request_token(&self) -> RequestToken {
		let token = RequestToken(self.shared.make_token());
		let _ = self.work_tx.send(Work::Reconcile);
		token
	}

	/// Release a token without submitting its request.
	pub fn cancel_request_token(&self, token: RequestToken) {
		if self.shared.remove_token(token.0) {
			let _ = self.work_tx.send(Work::Reconcile);
		}
	}

	/// Submit a request and await its typed response.
	///
	/// The token is consumed on every exit path. Dropping the returned
	/// future does NOT cancel the in-flight socket request (the wire
	/// protocol has no cancel frame); it only stops the caller from
	/// observing the completion.
	pub async fn make_request(
		&self,
		request: ChatRequest,
		token: RequestToken,
	) -> Result<ChatResponse, Error> {
		debug_assert_eq!(
			request.authenticated,
			self.kind.is_identified(),
			"request authentication does not match the connection kind",
		);

		if self.shared.app_expired.load(Ordering::Relaxed) {
			let url = request.url;
			self.cancel_request_token(token);
			return Err(Error::InvalidAppState(url));
		}

		let url = request.url.clone();
		let (completion, response_rx) = oneshot::channel();
		if let Err(mpsc::error::SendError(rejected)) = self.work_tx.send(Work::Submit {
			request,
			token,
			completion,
		}) {
			// controller is gone; token bookkeeping still applies
			if let Work::Submit { token, .. } = rejected {
				self.shared.remove_token(token.0);
			}
			return Err(Error::NetworkFailure(url));
		}

		match response_rx.await {
			Ok(result) => result,
			Err(_) => Err(Error::NetworkFailure(url)),
		}
	}

	// --- lifecycle inputs ------------------------------------------------

	pub fn app_became_ready(&self) {
		let _ = self.work_tx.send(Work::AppBecameReady);
	}

	pub fn app_did_become_active(&self) {
		let _ = self.work_tx.send(Work::ApplicationActive(true));
	}

	pub fn app_will_resign_active(&self) {
		let _ = self.work_tx.send(Work::ApplicationActive(false));
	}

	pub fn registration_state_changed(&self, registered: bool) {
		let _ = self.work_tx.send(Work::RegistrationChanged(registered));
	}

	pub fn app_expiry_changed(&self, expired: bool) {
		let _ = self.work_tx.send(Work::AppExpiryChanged(expired));
	}

	pub fn local_identity_changed(&self) {
		let _ = self.work_tx.send(Work::CycleRequested("localIdentityChanged"));
	}

	pub fn censorship_circumvention_changed(&self) {
		let _ = self
			.work_tx
			.send(Work::CycleRequested("censorshipCircumventionChanged"));
	}

	pub fn proxy_readiness_changed(&self, ready: bool) {
		let _ = self.work_tx.send(Work::ProxyReadyChanged(ready));
	}

	pub fn stories_enabled_changed(&self) {
		let _ = self.work_tx.send(Work::CycleRequested("storiesEnabledChanged"));
	}

	/// A push notification arrived; wake the socket for its 20 second
	/// window even while the app is in the background.
	pub fn did_receive_push(&self) {
		let _ = self.work_tx.send(Work::PushReceived);
	}
}

enum Wake {
	Work(Work),
	Shutdown,
	Heartbeat,
	Reconnect,
	BackgroundTick,
	ConnectWatchdog,
}

struct Controller {
	kind: ConnectionKind,
	config: ChatConfig,
	factory: Arc<dyn TransportFactory>,
	processing: ProcessingQueue,
	hooks: Hooks,
	shared: Arc<SharedInputs>,
	observer: Arc<StateObserver>,
	/// Weak so the work channel closes when the last handle drops; the
	/// timers and transports that need to post back upgrade it for as
	/// long as they live.
	work_tx: mpsc::WeakUnboundedSender<Work>,
	queue_empty_tx: watch::Sender<bool>,

	// desired-state inputs owned by this task (single writer)
	app_ready: bool,
	app_active: bool,
	registered: bool,
	app_expired: bool,
	keep_alive: KeepAliveRecord,

	current: Option<ConnectionInstance>,
	next_instance_id: u64,

	heartbeat_at: Option<Instant>,
	reconnect_at: Option<Instant>,
	background_at: Option<Instant>,
	background_guard: Option<BackgroundActivityGuard>,
	connect_watchdog: Option<(u64, Instant)>,
}

/// Disabled select arms still evaluate their expression, so absent
/// deadlines become a sleep that is constructed but never polled.
fn deadline_or_far(deadline: Option<Instant>) -> Instant {
	deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60 * 60 * 24))
}

impl Controller {
	async fn run(mut self, mut work_rx: mpsc::UnboundedReceiver<Work>) {
		log::debug!("{:?} chat connection controller started", self.kind);
		loop {
			let watchdog_at = self.connect_watchdog.map(|(_, at)| at);
			let wake = tokio::select! {
				biased;
				work = work_rx.recv() => match work {
					Some(work) => Wake::Work(work),
					None => Wake::Shutdown,
				},
				_ = sleep_until(deadline_or_far(watchdog_at)), if watchdog_at.is_some() => {
					Wake::ConnectWatchdog
				}
				_ = sleep_until(deadline_or_far(self.heartbeat_at)), if self.heartbeat_at.is_some() => {
					Wake::Heartbeat
				}
				_ = sleep_until(deadline_or_far(self.reconnect_at)), if self.reconnect_at.is_some() => {
					Wake::Reconnect
				}
				_ = sleep_until(deadline_or_far(self.background_at)), if self.background_at.is_some() => {
					Wake::BackgroundTick
				}
			};

			match wake {
				Wake::Shutdown => break,
				Wake::Work(work) => self.handle_work(work),
				Wake::ConnectWatchdog => self.connect_watchdog_fired(),
				Wake::Heartbeat => self.heartbeat_tick(),
				Wake::Reconnect => {
					self.reconnect_at = None;
					self.apply_desired_state();
				}
				Wake::BackgroundTick => {
					self.background_at = None;
					self.apply_desired_state();
				}
			}
		}

		// last handle dropped: tear down and fail parked open-waiters
		log::debug!("{:?} chat connection controller shutting down", self.kind);
		self.drop_current_instance();
		self.observer.shutdown();
	}

	fn handle_work(&mut self, work: Work) {
		match work {
			Work::AppBecameReady => {
				self.app_ready = true;
				self.apply_desired_state();
			}
			Work::ApplicationActive(active) => {
				self.app_active = active;
				self.apply_desired_state();
			}
			Work::RegistrationChanged(registered) => {
				self.registered = registered;
				self.apply_desired_state();
			}
			Work::AppExpiryChanged(expired) => {
				self.app_expired = expired;
				self.shared.app_expired.store(expired, Ordering::Relaxed);
				self.cycle("appExpiryChanged");
			}
			Work::ProxyReadyChanged(ready) => {
				if ready {
					self.cycle("proxyBecameReady");
				} else {
					self.apply_desired_state();
				}
			}
			Work::CycleRequested(reason) => self.cycle(reason),
			Work::PushReceived => {
				self.keep_alive
					.extend(KeepAliveReason::DidReceivePush, Instant::now());
				if let Some(keep_alive) = self.keep_alive.current() {
					log::debug!("{:?} woken by push; {:?}", self.kind, keep_alive);
				}
				self.apply_desired_state();
			}
			Work::Reconcile => self.apply_desired_state(),
			Work::Submit {
				request,
				token,
				completion,
			} => self.handle_submit(request, token, completion),
			Work::Transport { instance_id, event } => {
				self.handle_transport_event(instance_id, event);
			}
			Work::RequestTimedOut {
				instance_id,
				request_id,
			} => self.handle_request_timeout(instance_id, request_id),
			Work::EnvelopeProcessed {
				instance_id,
				request_id,
				should_ack,
			} => {
				if self.current.as_ref().is_some_and(|i| i.id == instance_id) {
					if should_ack {
						self.send_ack(request_id, "OK");
					} else {
						log::warn!(
							"{:?} suppressing ack for envelope request {:x}",
							self.kind,
							request_id
						);
					}
				}
			}
			Work::QueueFlushed { instance_id } => self.handle_queue_flushed(instance_id),
		}
	}

	// --- reconciliation --------------------------------------------------

	fn observed_inputs(&self) -> ObservedInputs {
		ObservedInputs {
			app_ready: self.app_ready,
			registered: self.registered,
			app_expired: self.app_expired,
			can_use_sockets: self.config.socket_capable,
			has_pending_requests: self
				.current
				.as_ref()
				.is_some_and(|i| !i.registry.is_empty()),
			has_unsubmitted_tokens: self.shared.has_tokens(),
			can_build_transport: self.factory.can_build(),
			app_active: self.app_active,
			has_background_keep_alive: self.keep_alive.is_active(Instant::now()),
		}
	}

	fn visible_state(&self) -> VisibleState {
		match &self.current {
			None => VisibleState::Closed,
			Some(instance) if instance.is_disconnected() => VisibleState::Closed,
			Some(instance) if instance.is_open() => VisibleState::Open,
			Some(_) => VisibleState::Connecting,
		}
	}

	fn publish_state(&self) {
		self.observer.publish(self.visible_state());
	}

	/// Make the actual socket state match the desired one. Safe to call
	/// redundantly: with unchanged inputs it performs no transport
	/// operations and arms no new timers.
	fn apply_desired_state(&mut self) {
		if !self.app_ready {
			log::debug!("{:?} deferring reconcile until the app is ready", self.kind);
			return;
		}

		let desired = evaluate(&self.observed_inputs());
		{
			let mut last = self
				.shared
				.last_desired
				.lock()
				.unwrap_or_else(|poisoned| poisoned.into_inner());
			if *last != Some(desired) {
				log::info!("{:?} desired state: {:?}", self.kind, desired);
				*last = Some(desired);
			}
		}

		if desired.is_open() {
			if self.current.as_ref().is_none_or(|i| i.is_disconnected()) {
				self.open_new_instance();
			}
			if self.visible_state() == VisibleState::Open {
				self.reconnect_at = None;
			} else if self.reconnect_at.is_none() {
				self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
			}
			if self.app_active {
				self.background_at = None;
				self.background_guard = None;
			} else {
				if self.background_at.is_none() {
					self.background_at = Some(Instant::now() + BACKGROUND_TICK);
				}
				if self.background_guard.is_none() {
					self.background_guard =
						Some(self.hooks.background.begin_activity("chat-connection"));
				}
			}
		} else {
			self.reconnect_at = None;
			self.drop_current_instance();
			self.background_at = None;
			self.background_guard = None;
		}
	}

	fn open_new_instance(&mut self) {
		let Some(work_tx) = self.work_tx.upgrade() else {
			// every handle is gone; shutdown is imminent
			return;
		};
		self.next_instance_id += 1;
		let id = self.next_instance_id;
		let events = TransportEventSink {
			instance_id: id,
			work_tx,
		};
		match self.factory.build(self.kind, events) {
			Ok(transport) => {
				log::info!("{:?} connecting (instance {})", self.kind, id);
				self.current = Some(ConnectionInstance::new(id, transport));
				self.connect_watchdog = Some((id, Instant::now() + self.config.connect_timeout));
				self.heartbeat_at = None;
				// the latch is per instance
				self.queue_empty_tx.send_replace(false);
				self.publish_state();
			}
			Err(e) => {
				log::warn!("{:?} could not build a transport: {}", self.kind, e);
			}
		}
	}

	/// Dropping the instance closes its transport and fails every
	/// still-pending request with `NetworkFailure`.
	fn drop_current_instance(&mut self) {
		if let Some(instance) = self.current.take() {
			log::info!("{:?} dropping instance {}", self.kind, instance.id);
		}
		self.heartbeat_at = None;
		self.connect_watchdog = None;
		self.publish_state();
	}

	/// Drop the current instance and immediately re-evaluate, creating
	/// a fresh one if the socket should be open.
	fn cycle(&mut self, reason: &'static str) {
		log::info!("{:?} cycling socket: {}", self.kind, reason);
		self.drop_current_instance();
		self.apply_desired_state();
	}

	// --- timers ----------------------------------------------------------

	fn heartbeat_tick(&mut self) {
		self.heartbeat_at = Some(Instant::now() + self.config.heartbeat_interval);
		let desired = evaluate(&self.observed_inputs());
		let socket_open = self.current.as_ref().is_some_and(|i| i.is_open());
		if desired.is_open() && socket_open {
			if let Some(instance) = self.current.as_ref()
				&& let Err(e) = instance.write_ping()
			{
				log::warn!("{:?} heartbeat ping failed: {}", self.kind, e);
			}
		} else {
			self.apply_desired_state();
		}
	}

	fn connect_watchdog_fired(&mut self) {
		let Some((instance_id, _)) = self.connect_watchdog.take() else {
			return;
		};
		let stuck = self
			.current
			.as_ref()
			.is_some_and(|i| i.id == instance_id && !i.has_connected);
		if stuck {
			log::warn!("{:?} connect attempt timed out", self.kind);
			self.cycle("connectWatchdog");
		}
	}

	// --- request submission ----------------------------------------------

	fn handle_submit(
		&mut self,
		request: ChatRequest,
		token: RequestToken,
		completion: oneshot::Sender<Result<ChatResponse, Error>>,
	) {
		self.shared.remove_token(token.0);
		let url = request.url.clone();

		if request.wire_path().is_none() || matches!(request.body, RequestBody::InvalidJson) {
			let _ = completion.send(Err(Error::InvalidRequest(url)));
			self.apply_desired_state();
			return;
		}

		if !self.current.as_ref().is_some_and(|i| i.is_open()) {
			log::warn!("{:?} rejecting {}: socket is not open", self.kind, url);
			let _ = completion.send(Err(Error::NetworkFailure(url)));
			self.apply_desired_state();
			return;
		}

		let request_timeout = self.config.request_timeout;
		let Some(work_tx) = self.work_tx.upgrade() else {
			let _ = completion.send(Err(Error::NetworkFailure(url)));
			return;
		};
		let instance = self.current.as_mut().expect("checked open above");
		let instance_id = instance.id;
		let request_id = instance.registry.next_request_id();

		let wire = match request.to_wire(
			request_id,
			&self.config.user_agent,
			&self.config.accept_language,
		) {
			Ok(wire) => wire,
			Err(e) => {
				let _ = completion.send(Err(e));
				return;
			}
		};

		let timeout = tokio::spawn(async move {
			tokio::time::sleep(request_timeout).await;
			let _ = work_tx.send(Work::RequestTimedOut {
				instance_id,
				request_id,
			});
		})
		.abort_handle();

		instance.registry.insert(
			request_id,
			PendingRequest::new(url.clone(), request.method.clone(), completion, timeout),
		);

		if let Err(e) = instance.send_frame(request_frame(wire)) {
			log::warn!("{:?} transport rejected {}: {}", self.kind, url, e);
			if let Some(pending) = instance.registry.pop(request_id) {
				pending.fail_invalid();
			}
		}
	}

	fn handle_request_timeout(&mut self, instance_id: u64, request_id: u64) {
		if !self.current.as_ref().is_some_and(|i| i.id == instance_id) {
			return;
		}
		let timed_out = self
			.current
			.as_mut()
			.and_then(|i| i.registry.pop(request_id));
		if let Some(pending) = timed_out {
			log::warn!(
				"{:?} request {:x} timed out; cycling socket",
				self.kind,
				request_id
			);
			pending.fail_network();
			self.cycle("requestTimeout");
		}
	}

	// --- transport events ------------------------------------------------

	fn handle_transport_event(&mut self, instance_id: u64, event: TransportEvent) {
		if !self.current.as_ref().is_some_and(|i| i.id == instance_id) {
			log::debug!(
				"{:?} ignoring event for superseded instance {}",
				self.kind,
				instance_id
			);
			return;
		}
		match event {
			TransportEvent::Connected => {
				if let Some(instance) = self.current.as_mut() {
					instance.mark_connected();
				}
				self.connect_watchdog = None;
				self.heartbeat_at = Some(Instant::now() + self.config.heartbeat_interval);
				if self.kind.is_identified() {
					self.hooks.registration.set_deregistered(false);
				}
				self.hooks.outage.connection_succeeded();
				log::info!("{:?} socket open", self.kind);
				self.publish_state();
				self.apply_desired_state();
			}
			TransportEvent::Frame(data) => match decode_frame(&data) {
				Ok(ChatFrame::Request(request)) => self.handle_server_request(request),
				Ok(ChatFrame::Response(response_id, response)) => {
					self.handle_response(response_id, response);
				}
				Err(e) => log::warn!("{:?} dropping undecodable frame: {}", self.kind, e),
			},
			TransportEvent::Disconnected(reason) => {
				log::warn!("{:?} socket disconnected: {:?}", self.kind, reason);
				if self.kind.is_identified()
					&& matches!(
						reason,
						DisconnectReason::UpgradeFailed(status) if status == StatusCode::FORBIDDEN
					) {
					log::warn!("identified socket rejected with 403; marking deregistered");
					self.registered = false;
					self.hooks.registration.set_deregistered(true);
				}
				if let Some(instance) = self.current.as_mut() {
					instance.mark_disconnected();
				}
				self.drop_current_instance();
				self.hooks.outage.connection_failed();
				self.apply_desired_state();
			}
		}
	}

	// --- server-initiated requests ---------------------------------------

	fn handle_server_request(&mut self, request: WebSocketRequestMessage) {
		let Some(instance_id) = self.current.as_ref().map(|i| i.id) else {
			return;
		};
		let Some(request_id) = request.id else {
			log::warn!("{:?} dropping server request without an id", self.kind);
			return;
		};
		let verb = request.verb.as_deref().unwrap_or("");
		let path = request.path.as_deref().unwrap_or("");

		match (verb, path) {
			("PUT", SERVER_MESSAGE_PATH) => {
				self.keep_alive
					.extend(KeepAliveReason::ReceiveMessage, Instant::now());
				let timestamp = wire_header_value(&request.headers, TIMESTAMP_HEADER)
					.and_then(|value| value.parse::<i64>().ok())
					.and_then(DateTime::<Utc>::from_timestamp_millis)
					.unwrap_or_else(|| {
						log::warn!(
							"{:?} envelope without a usable {} header",
							self.kind,
							TIMESTAMP_HEADER
						);
						DateTime::UNIX_EPOCH
					});
				let envelope = Bytes::from(request.body.unwrap_or_default());
				let source = match self.kind {
					ConnectionKind::Identified => EnvelopeSource::WebsocketIdentified,
					ConnectionKind::Unidentified => EnvelopeSource::WebsocketUnidentified,
				};
				let Some(work_tx) = self.work_tx.upgrade() else {
					return;
				};
				let ack_rx = self.processing.submit_envelope(envelope, timestamp, source);
				tokio::spawn(async move {
					// a dead processing queue means "do not ack"
					let should_ack = ack_rx.await.unwrap_or(false);
					let _ = work_tx.send(Work::EnvelopeProcessed {
						instance_id,
						request_id,
						should_ack,
					});
				});
			}
			("GET", SERVER_QUEUE_EMPTY_PATH) => {
				self.send_ack(request_id, "OK");
				let Some(work_tx) = self.work_tx.upgrade() else {
					return;
				};
				let flushed_rx = self.processing.submit_flush();
				tokio::spawn(async move {
					let _ = flushed_rx.await;
					let _ = work_tx.send(Work::QueueFlushed { instance_id });
				});
			}
			_ => {
				log::info!(
					"{:?} acking unhandled server request {} {}",
					self.kind,
					verb,
					path
				);
				self.send_ack(request_id, "OK");
			}
		}
	}

	fn handle_queue_flushed(&mut self, instance_id: u64) {
		let Some(instance) = self.current.as_mut() else {
			return;
		};
		if instance.id != instance_id {
			return;
		}
		if instance.latch_queue_emptied() {
			log::info!("{:?} initial message queue emptied", self.kind);
			self.queue_empty_tx.send_replace(true);
			self.observer.reannounce();
		}
		self.apply_desired_state();
	}

	fn send_ack(&self, request_id: u64, message: &str) {
		if let Some(instance) = self.current.as_ref()
			&& let Err(e) = instance.send_frame(ack_frame(request_id, StatusCode::OK, message))
		{
			log::warn!(
				"{:?} failed to ack server request {:x}: {}",
				self.kind,
				request_id,
				e
			);
		}
	}

	// --- responses -------------------------------------------------------

	fn handle_response(&mut self, response_id: u64, response: WebSocketResponseMessage) {
		self.keep_alive
			.extend(KeepAliveReason::ReceiveResponse, Instant::now());
		let popped = self
			.current
			.as_mut()
			.and_then(|i| i.registry.pop(response_id));
		match popped {
			Some(pending) => {
				if pending.complete(response) {
					self.hooks.outage.connection_succeeded();
				}
			}
			None => log::warn!(
				"{:?} dropping response for unknown request id {:x}",
				self.kind,
				response_id
			),
		}
		self.apply_desired_state();
	}
}
