//! [`RosbridgeClient`] – connection manager and host-facing surface.
//!
//! # Threading model
//!
//! [`connect`][RosbridgeClient::connect] spawns one OS thread that owns a
//! single-threaded Tokio runtime.  That thread opens the socket, sends the
//! `subscribe` / `advertise` handshake, then sits in a `tokio::select!` loop
//! over inbound frames and outbound commands.  Inbound frames are dispatched
//! onto the delivery queue right there; nothing on the network thread ever
//! calls into host code.
//!
//! The host thread pulls work with [`poll`][RosbridgeClient::poll], once per
//! tick.  That is the only place binding callbacks run.
//!
//! [`disconnect`][RosbridgeClient::disconnect] signals the network thread and
//! joins it.  On shutdown the thread drops the read half, sends the
//! `unsubscribe` / `unadvertise` teardown on the still-open write half, closes
//! the socket and exits.  A shutdown that arrives while the socket is still
//! opening abandons the open without any handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

use chrono::Utc;
use rosbridge_types::{BridgeError, ConnectionState};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::delivery::{DeliveryTask, Inbox};
use crate::dispatch::Dispatcher;
use crate::protocol;
use crate::registry::{BindingRegistry, PublisherBinding, ServiceResponderBinding, SubscriberBinding};
use crate::transport::{Frame, FrameSink, Transport, WebSocketTransport};

const NETWORK_THREAD_NAME: &str = "rosbridge-net";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `from → to` only if nobody changed the state in between.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Host → network thread.
#[derive(Debug)]
enum Command {
    Send(String),
    Shutdown,
}

struct NetworkWorker {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl NetworkWorker {
    fn send(&self, frame: String) {
        if self.commands.send(Command::Send(frame)).is_err() {
            debug!(connection = %self.id, "network thread has exited; frame dropped");
        }
    }
}

struct NetworkContext<C> {
    id: Uuid,
    url: String,
    transport: Arc<dyn Transport>,
    /// Registry snapshot taken at connect; teardown mirrors it exactly.
    bindings: BindingRegistry<C>,
    dispatcher: Dispatcher<C>,
    state: Arc<SharedState>,
}

// ---------------------------------------------------------------------------
// RosbridgeClient
// ---------------------------------------------------------------------------

/// A rosbridge client whose callbacks run on the host's own thread.
///
/// `C` is the context handed to every binding callback by
/// [`poll`][Self::poll].
///
/// # Example
///
/// ```rust,no_run
/// use rosbridge_client::{ClientConfig, RosbridgeClient, SubscriberBinding};
/// use rosbridge_types::BridgeError;
/// use serde_json::Value;
///
/// struct Flag;
///
/// impl SubscriberBinding<Vec<bool>> for Flag {
///     type Message = bool;
///     fn topic(&self) -> &str { "/flag" }
///     fn message_type(&self) -> &str { "std_msgs/Bool" }
///     fn decode(&self, payload: &Value) -> Result<bool, BridgeError> {
///         payload["data"].as_bool().ok_or_else(|| BridgeError::Decode {
///             topic: "/flag".into(),
///             reason: "expected bool".into(),
///         })
///     }
///     fn deliver(&self, message: bool, seen: &mut Vec<bool>) {
///         seen.push(message);
///     }
/// }
///
/// let mut client = RosbridgeClient::<Vec<bool>>::new(&ClientConfig::default());
/// client.register_subscriber(Flag).expect("valid binding");
/// client.connect().expect("not yet connected");
///
/// let mut seen = Vec::new();
/// loop {
///     client.poll(&mut seen);
///     # break;
/// }
/// client.disconnect();
/// ```
pub struct RosbridgeClient<C: 'static = ()> {
    url: String,
    transport: Arc<dyn Transport>,
    registry: BindingRegistry<C>,
    inbox: Arc<Inbox<C>>,
    state: Arc<SharedState>,
    worker: Option<NetworkWorker>,
}

impl<C: 'static> RosbridgeClient<C> {
    /// Create a client that talks WebSocket to `config.url()`.
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_transport(config, WebSocketTransport)
    }

    /// Create a client over a custom [`Transport`].
    pub fn with_transport(config: &ClientConfig, transport: impl Transport) -> Self {
        Self {
            url: config.url(),
            transport: Arc::new(transport),
            registry: BindingRegistry::new(),
            inbox: Arc::new(Inbox::new()),
            state: Arc::new(SharedState::new()),
            worker: None,
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a subscriber.  See [`BindingRegistry::register_subscriber`].
    pub fn register_subscriber<B>(&mut self, binding: B) -> Result<(), BridgeError>
    where
        B: SubscriberBinding<C>,
    {
        self.warn_if_connected(<B as SubscriberBinding<C>>::topic(&binding));
        self.registry.register_subscriber(binding)
    }

    /// Register a publisher.  See [`BindingRegistry::register_publisher`].
    pub fn register_publisher<B>(&mut self, binding: B) -> Result<(), BridgeError>
    where
        B: PublisherBinding,
    {
        self.warn_if_connected(binding.topic());
        self.registry.register_publisher(binding)
    }

    /// Register (or replace) the service responder.
    pub fn register_service_responder<B>(&mut self, binding: B) -> Result<(), BridgeError>
    where
        B: ServiceResponderBinding<C>,
    {
        self.registry.register_service_responder(binding)
    }

    fn warn_if_connected(&self, topic: &str) {
        if self.worker.is_some() {
            warn!(topic = %topic, "binding registered while connected; it takes effect on the next connect");
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Start the network thread, open the socket and send the handshake.
    ///
    /// Returns as soon as the thread is running; the socket opens in the
    /// background.  A failed open is logged and leaves the client `Closed`
    /// until [`disconnect`][Self::disconnect].
    ///
    /// # Errors
    ///
    /// * [`BridgeError::AlreadyConnected`] if a network thread is running.
    /// * [`BridgeError::Transport`] if the thread cannot be spawned.
    #[instrument(skip(self), fields(url = %self.url))]
    pub fn connect(&mut self) -> Result<(), BridgeError> {
        if self.worker.is_some() {
            return Err(BridgeError::AlreadyConnected);
        }

        let id = Uuid::new_v4();
        let bindings = self.registry.clone();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let context = NetworkContext {
            id,
            url: self.url.clone(),
            transport: Arc::clone(&self.transport),
            bindings: bindings.clone(),
            dispatcher: Dispatcher::new(bindings.clone(), Arc::clone(&self.inbox)),
            state: Arc::clone(&self.state),
        };

        self.state.set(ConnectionState::Connecting);
        let spawned = std::thread::Builder::new()
            .name(NETWORK_THREAD_NAME.to_string())
            .spawn(move || run_network_thread(context, command_rx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.state.set(ConnectionState::Closed);
                return Err(BridgeError::Transport(format!(
                    "failed to spawn network thread: {e}"
                )));
            }
        };

        debug!(
            connection = %id,
            subscribers = bindings.subscriber_count(),
            publishers = bindings.publisher_count(),
            "network thread started"
        );
        self.worker = Some(NetworkWorker {
            id,
            commands,
            handle,
        });
        Ok(())
    }

    /// Stop the network thread, send the teardown and close the socket.
    ///
    /// Blocks until the network thread has exited.  Teardown sends are
    /// best-effort: a failed `unsubscribe` does not prevent the following
    /// frames, and the socket is closed regardless.  A connection that is
    /// still opening is abandoned without a handshake.  Calling this without
    /// an active connection does nothing.
    #[instrument(skip(self), fields(url = %self.url))]
    pub fn disconnect(&mut self) {
        let Some(NetworkWorker {
            id,
            commands,
            handle,
        }) = self.worker.take()
        else {
            debug!("disconnect called without an active connection");
            return;
        };

        if matches!(
            self.state.get(),
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            self.state.set(ConnectionState::Closing);
        }
        // The thread may already be gone if its runtime failed to build.
        let _ = commands.send(Command::Shutdown);

        if handle.join().is_err() {
            error!(connection = %id, "network thread panicked");
        }

        self.state.set(ConnectionState::Closed);
        info!(connection = %id, "disconnected");
    }

    // -----------------------------------------------------------------------
    // Outbound gateway
    // -----------------------------------------------------------------------

    /// Publish `message` on `topic`.  Does nothing unless the socket is open.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serialization`] if `message` cannot be turned
    /// into JSON.
    pub fn publish<M>(&self, topic: &str, message: &M) -> Result<(), BridgeError>
    where
        M: Serialize + ?Sized,
    {
        let Some(worker) = self.open_worker() else {
            debug!(topic = %topic, "not connected; publish skipped");
            return Ok(());
        };
        let payload = serde_json::to_value(message)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        worker.send(protocol::publish(topic, &payload)?);
        Ok(())
    }

    /// Call `service` with JSON `args` (blank means no arguments).  Does
    /// nothing unless the socket is open.
    ///
    /// The result is not returned here: it arrives later as a
    /// `service_response` and is handed to the service responder by
    /// [`poll`][Self::poll].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serialization`] if `args` is not valid JSON.
    pub fn call_service(&self, service: &str, args: &str) -> Result<(), BridgeError> {
        let Some(worker) = self.open_worker() else {
            debug!(service = %service, "not connected; service call skipped");
            return Ok(());
        };
        let args = if args.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            protocol::payload_from_text(args)?
        };
        worker.send(protocol::call_service(service, &args)?);
        Ok(())
    }

    fn open_worker(&self) -> Option<&NetworkWorker> {
        if self.state.get() != ConnectionState::Open {
            return None;
        }
        self.worker.as_ref()
    }

    // -----------------------------------------------------------------------
    // Consumer side
    // -----------------------------------------------------------------------

    /// Deliver at most one queued message and the pending service result.
    ///
    /// Call once per host tick.  Callbacks run on the calling thread, after
    /// the queue lock has been released.  Returns the number of callbacks
    /// invoked.
    pub fn poll(&self, ctx: &mut C) -> usize {
        let mut delivered = 0;

        if let Some(task) = self.inbox.drain() {
            let DeliveryTask {
                topic,
                binding,
                message,
                received_at,
            } = task;
            trace!(
                topic = %topic,
                queued_ms = (Utc::now() - received_at).num_milliseconds(),
                "delivering message"
            );
            binding.deliver_erased(message, ctx);
            delivered += 1;
        }

        if let Some(result) = self.inbox.take_service_result() {
            match self.registry.service_responder() {
                Some(responder) => {
                    responder.deliver(&result.service, &result.payload, ctx);
                    delivered += 1;
                }
                None => warn!(
                    service = %result.service,
                    "service result dropped: no service responder registered"
                ),
            }
        }

        delivered
    }

    /// Number of messages waiting for [`poll`][Self::poll].
    pub fn pending_messages(&self) -> usize {
        self.inbox.queued()
    }
}

impl<C: 'static> Drop for RosbridgeClient<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Network thread
// ---------------------------------------------------------------------------

fn run_network_thread<C: 'static>(
    context: NetworkContext<C>,
    commands: mpsc::UnboundedReceiver<Command>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(connection = %context.id, error = %e, "failed to create tokio runtime");
            context.state.set(ConnectionState::Closed);
            return;
        }
    };
    runtime.block_on(network_loop(&context, commands));
}

async fn network_loop<C: 'static>(
    ctx: &NetworkContext<C>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    info!(connection = %ctx.id, url = %ctx.url, "opening rosbridge connection");
    let opened = tokio::select! {
        opened = ctx.transport.open(&ctx.url) => opened,
        () = wait_for_shutdown(&mut commands) => {
            info!(connection = %ctx.id, "shutdown requested while opening; connection abandoned");
            return;
        }
    };
    let (mut sink, mut stream) = match opened {
        Ok(pair) => pair,
        Err(e) => {
            error!(connection = %ctx.id, error = %e, "failed to open connection");
            ctx.state.set(ConnectionState::Closed);
            wait_for_shutdown(&mut commands).await;
            return;
        }
    };
    if ctx
        .state
        .transition(ConnectionState::Connecting, ConnectionState::Open)
    {
        info!(connection = %ctx.id, "connection open");
    }

    handshake(sink.as_mut(), &ctx.bindings).await;

    let mut reading = true;
    loop {
        tokio::select! {
            frame = stream.next_frame(), if reading => {
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        ctx.dispatcher.dispatch(&text);
                    }
                    Some(Ok(Frame::Close { code, reason })) => {
                        warn!(connection = %ctx.id, code, reason = %reason, "server closed the connection");
                        reading = false;
                        ctx.state.set(ConnectionState::Closed);
                    }
                    Some(Err(e)) => {
                        error!(connection = %ctx.id, error = %e, "socket error");
                        reading = false;
                        ctx.state.set(ConnectionState::Closed);
                    }
                    None => {
                        warn!(connection = %ctx.id, "socket stream ended");
                        reading = false;
                        ctx.state.set(ConnectionState::Closed);
                    }
                }
            }
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if !reading {
                        debug!(connection = %ctx.id, "socket closed; outbound frame dropped");
                    } else if let Err(e) = sink.send_text(text).await {
                        error!(connection = %ctx.id, error = %e, "send failed");
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
        }
    }

    // Stop reading before the teardown goes out.
    drop(stream);
    if reading {
        let failed = teardown(sink.as_mut(), &ctx.bindings).await;
        if failed > 0 {
            warn!(connection = %ctx.id, failed, "teardown incomplete");
        }
    }
    if let Err(e) = sink.close().await {
        warn!(connection = %ctx.id, error = %e, "error closing socket");
    }
}

async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Shutdown => return,
            Command::Send(_) => debug!("not connected; outbound frame dropped"),
        }
    }
}

/// `subscribe` for every subscriber, then `advertise` for every publisher,
/// both in registration order.
async fn handshake<C: 'static>(sink: &mut dyn FrameSink, bindings: &BindingRegistry<C>) {
    for subscriber in bindings.subscribers() {
        let frame = protocol::subscribe(subscriber.topic(), subscriber.message_type());
        send_logged(sink, frame, "subscribe", subscriber.topic()).await;
    }
    for publisher in bindings.publishers() {
        let frame = protocol::advertise(publisher.topic(), publisher.message_type());
        send_logged(sink, frame, "advertise", publisher.topic()).await;
    }
}

/// Mirror of [`handshake`]; returns how many frames could not be sent.
async fn teardown<C: 'static>(sink: &mut dyn FrameSink, bindings: &BindingRegistry<C>) -> usize {
    let mut failed = 0;
    for subscriber in bindings.subscribers() {
        let frame = protocol::unsubscribe(subscriber.topic());
        if !send_logged(sink, frame, "unsubscribe", subscriber.topic()).await {
            failed += 1;
        }
    }
    for publisher in bindings.publishers() {
        let frame = protocol::unadvertise(publisher.topic());
        if !send_logged(sink, frame, "unadvertise", publisher.topic()).await {
            failed += 1;
        }
    }
    failed
}

async fn send_logged(
    sink: &mut dyn FrameSink,
    frame: Result<String, BridgeError>,
    op: &str,
    topic: &str,
) -> bool {
    let sent = match frame {
        Ok(text) => sink.send_text(text).await,
        Err(e) => Err(e),
    };
    match sent {
        Ok(()) => {
            debug!(op = %op, topic = %topic, "sent");
            true
        }
        Err(e) => {
            warn!(op = %op, topic = %topic, error = %e, "send failed");
            false
        }
    }
}
