//! Persistent authenticated WebSocket connection manager for the chat
//! server: one always-on duplex channel per [`ConnectionKind`], RPC
//! requests multiplexed over it, server pushes demultiplexed off it,
//! and a lifecycle policy deciding when the socket should be open.

pub mod config;
pub(crate) mod consts;
pub mod controller;
pub mod desired;
pub mod error;
pub(crate) mod frames;
pub mod hooks;
pub(crate) mod instance;
pub mod keepalive;
pub mod observer;
pub mod processor;
pub(crate) mod registry;
pub mod request;
pub mod transport;

pub use config::{ChatConfig, ConnectionKind};
pub use controller::{ChatConnection, RequestToken};
pub use desired::DesiredState;
pub use error::Error;
pub use observer::VisibleState;
pub use request::{ChatRequest, ChatResponse};
