use std::time::Duration;

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const BACKGROUND_TICK: Duration = Duration::from_secs(1);

pub(crate) const WEBSOCKET_PATH: &str = "/v1/websocket/";

pub(crate) const SERVER_MESSAGE_PATH: &str = "/api/v1/message";
pub(crate) const SERVER_QUEUE_EMPTY_PATH: &str = "/api/v1/queue/empty";

/// Base-10 milliseconds-since-epoch delivery timestamp attached by the
/// server to every pushed envelope.
pub(crate) const TIMESTAMP_HEADER: &str = "x-signal-timestamp";

pub(crate) const DEFAULT_USER_AGENT: &str = "Courier-Client/0.3";
pub(crate) const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US";
