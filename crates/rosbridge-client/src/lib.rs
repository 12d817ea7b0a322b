//! `rosbridge-client` – rosbridge WebSocket client for hosts that own their
//! main loop.
//!
//! A host registers typed bindings, calls [`RosbridgeClient::connect`], and
//! then calls [`RosbridgeClient::poll`] once per tick.  All socket work
//! happens on a background thread; all binding callbacks run inside `poll`,
//! on the host's thread.
//!
//! # Modules
//!
//! - [`registry`] – Binding traits and the validated [`BindingRegistry`].
//! - [`protocol`] – rosbridge JSON envelopes, outbound and inbound.
//! - [`delivery`] – Latest-value-per-topic [`CoalescingQueue`] and the
//!   pending service result slot.
//! - [`transport`] – Socket seam; [`WebSocketTransport`] for production use.
//! - [`connection`] – [`RosbridgeClient`], the connection manager.
//! - [`config`] – [`ClientConfig`] and `~/.rosbridge/client.toml`.

pub mod config;
pub mod connection;
pub mod delivery;
mod dispatch;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use config::ClientConfig;
pub use connection::RosbridgeClient;
pub use delivery::{CoalescingQueue, Keyed, Offered, PendingServiceResult};
pub use registry::{BindingRegistry, PublisherBinding, ServiceResponderBinding, SubscriberBinding};
pub use transport::{Frame, FrameSink, FrameStream, Transport, WebSocketTransport};

pub use rosbridge_types::{BridgeError, Capability, ConnectionState};
