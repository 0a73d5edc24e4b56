/// What the lifecycle controller wants the socket to be doing.
///
/// The reason strings are diagnostics only, but they participate in
/// equality so a change of reason is observable in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
	Open { reason: &'static str },
	Closed { reason: &'static str },
}

impl DesiredState {
	pub fn is_open(self) -> bool {
		matches!(self, DesiredState::Open { .. })
	}

	pub fn reason(self) -> &'static str {
		match self {
			DesiredState::Open { reason } | DesiredState::Closed { reason } => reason,
		}
	}
}

/// Snapshot of everything the evaluator looks at.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ObservedInputs {
	pub app_ready: bool,
	pub registered: bool,
	pub app_expired: bool,
	pub can_use_sockets: bool,
	pub has_pending_requests: bool,
	pub has_unsubmitted_tokens: bool,
	pub can_build_transport: bool,
	pub app_active: bool,
	pub has_background_keep_alive: bool,
}

/// The desired-state policy. Pure; order matters, first match wins.
pub(crate) fn evaluate(inputs: &ObservedInputs) -> DesiredState {
	if !inputs.app_ready {
		return DesiredState::Closed { reason: "!appReady" };
	}
	if !inputs.registered {
		return DesiredState::Closed { reason: "!registered" };
	}
	if inputs.app_expired {
		return DesiredState::Closed { reason: "appExpired" };
	}
	if !inputs.can_use_sockets {
		return DesiredState::Closed {
			reason: "!canAppUseSockets",
		};
	}
	if inputs.has_pending_requests {
		return DesiredState::Open {
			reason: "hasPendingRequests",
		};
	}
	if inputs.has_unsubmitted_tokens {
		return DesiredState::Open {
			reason: "unsubmittedRequestTokens",
		};
	}
	if !inputs.can_build_transport {
		return DesiredState::Closed {
			reason: "cannotBuild",
		};
	}
	if inputs.app_active {
		return DesiredState::Open { reason: "appActive" };
	}
	if inputs.has_background_keep_alive {
		return DesiredState::Open {
			reason: "hasBackgroundKeepAlive",
		};
	}
	DesiredState::Closed { reason: "default" }
}

#[cfg(test)]
mod tests {
	use super::*;

	fn healthy_foreground() -> ObservedInputs {
		ObservedInputs {
			app_ready: true,
			registered: true,
			app_expired: false,
			can_use_sockets: true,
			has_pending_requests: false,
			has_unsubmitted_tokens: false,
			can_build_transport: true,
			app_active: true,
			has_background_keep_alive: false,
		}
	}

	#[test]
	fn foreground_active_opens() {
		assert_eq!(
			evaluate(&healthy_foreground()),
			DesiredState::Open { reason: "appActive" }
		);
	}

	#[test]
	fn readiness_outranks_everything() {
		let inputs = ObservedInputs {
			app_ready: false,
			..healthy_foreground()
		};
		assert_eq!(
			evaluate(&inputs),
			DesiredState::Closed { reason: "!appReady" }
		);
	}

	#[test]
	fn pending_work_outranks_transport_availability() {
		// a request already in flight keeps the desire open even when
		// the factory can no longer build sockets
		let inputs = ObservedInputs {
			has_pending_requests: true,
			can_build_transport: false,
			app_active: false,
			..healthy_foreground()
		};
		assert_eq!(
			evaluate(&inputs),
			DesiredState::Open {
				reason: "hasPendingRequests"
			}
		);

		let inputs = ObservedInputs {
			has_unsubmitted_tokens: true,
			can_build_transport: false,
			app_active: false,
			..healthy_foreground()
		};
		assert_eq!(
			evaluate(&inputs),
			DesiredState::Open {
				reason: "unsubmittedRequestTokens"
			}
		);
	}

	#[test]
	fn registration_outranks_pending_work() {
		let inputs = ObservedInputs {
			registered: false,
			has_pending_requests: true,
			..healthy_foreground()
		};
		assert_eq!(
			evaluate(&inputs),
			DesiredState::Closed { reason: "!registered" }
		);
	}

	#[test]
	fn expiry_outranks_socket_capability() {
		let inputs = ObservedInputs {
			app_expired: true,
			can_use_sockets: false,
			..healthy_foreground()
		};
		assert_eq!(
			evaluate(&inputs),
			DesiredState::Closed { reason: "appExpired" }
		);
	}

	#[test]
	fn background_keep_alive_opens_inactive_app() {
		let inputs = ObservedInputs {
			app_active: false,
			has_background_keep_alive: true,
			..healthy_foreground()
		};
		assert_eq!(
			evaluate(&inputs),
			DesiredState::Open {
				reason: "hasBackgroundKeepAlive"
			}
		);
	}

	#[test]
	fn idle_background_closes() {
		let inputs = ObservedInputs {
			app_active: false,
			..healthy_foreground()
		};
		assert_eq!(evaluate(&inputs), DesiredState::Closed { reason: "default" });
	}

	#[test]
	fn unbuildable_transport_closes_unless_work_pending() {
		let inputs = ObservedInputs {
			can_build_transport: false,
			..healthy_foreground()
		};
		assert_eq!(
			evaluate(&inputs),
			DesiredState::Closed {
				reason: "cannotBuild"
			}
		);
	}
}
