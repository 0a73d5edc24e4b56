use std::any::Any;
use std::sync::Arc;

/// Registration-state side effects the controller triggers: the
/// identified socket marks the account deregistered after a 403 on
/// connect and clears the flag once a connect succeeds.
pub trait RegistrationHooks: Send + Sync {
	fn set_deregistered(&self, deregistered: bool) {
		let _ = deregistered;
	}
}

/// Connection-level outcomes for outage detection. Individual request
/// errors are never reported here.
pub trait OutageHooks: Send + Sync {
	fn connection_succeeded(&self) {}
	fn connection_failed(&self) {}
}

/// While this guard lives, the host is asked to keep the process
/// runnable; dropping it signals that no further work is expected. On
/// platforms without the concept it is a no-op.
pub struct BackgroundActivityGuard {
	_token: Option<Box<dyn Any + Send>>,
}

impl BackgroundActivityGuard {
	pub fn new(token: Box<dyn Any + Send>) -> Self {
		Self { _token: Some(token) }
	}

	pub fn noop() -> Self {
		Self { _token: None }
	}
}

pub trait BackgroundActivityHooks: Send + Sync {
	fn begin_activity(&self, label: &'static str) -> BackgroundActivityGuard {
		let _ = label;
		BackgroundActivityGuard::noop()
	}
}

struct NoopHooks;

impl RegistrationHooks for NoopHooks {}
impl OutageHooks for NoopHooks {}
impl BackgroundActivityHooks for NoopHooks {}

/// The external collaborators injected into a connection.
#[derive(Clone)]
pub struct Hooks {
	pub registration: Arc<dyn RegistrationHooks>,
	pub outage: Arc<dyn OutageHooks>,
	pub background: Arc<dyn BackgroundActivityHooks>,
}

impl Default for Hooks {
	fn default() -> Self {
		let noop = Arc::new(NoopHooks);
		Self {
			registration: noop.clone(),
			outage: noop.clone(),
			background: noop,
		}
	}
}
