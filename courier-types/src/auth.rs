use std::fmt;

/// Server-issued chat credentials for an identified connection.
///
/// The password is deliberately excluded from `Debug` output so the
/// credentials can appear in logs without leaking.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerCredentials {
	pub username: String,
	pub password: String,
}

impl ServerCredentials {
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
		}
	}
}

impl fmt::Debug for ServerCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServerCredentials")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_redacts_password() {
		let creds = ServerCredentials::new("ab12", "hunter2");
		let debug = format!("{:?}", creds);
		assert!(debug.contains("ab12"));
		assert!(!debug.contains("hunter2"));
	}
}
