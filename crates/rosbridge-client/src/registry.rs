//! [`BindingRegistry`] – capability-checked store of host bindings.
//!
//! Hosts describe what they want from the bridge through three binding
//! traits:
//!
//! * [`SubscriberBinding`] – a topic the host listens to, with a decoder for
//!   its payload and a callback for the decoded message.
//! * [`PublisherBinding`] – a topic the host advertises and publishes on.
//! * [`ServiceResponderBinding`] – the single receiver of service results.
//!
//! Every callback receives a caller-supplied context `C`, which is whatever
//! the host's consumer thread owns (a scene, a model, a channel, `()`).
//!
//! Bindings are validated once, at registration: the topic and message type
//! each capability relies on must be present, otherwise registration fails
//! with [`BridgeError::InvalidBinding`] and nothing is stored.

use std::any::Any;
use std::sync::Arc;

use rosbridge_types::{BridgeError, Capability};
use serde_json::Value;
use tracing::{debug, error};

/// A topic subscription supplied by the host.
pub trait SubscriberBinding<C>: Send + Sync + 'static {
    /// Decoded message type handed to [`deliver`][Self::deliver].
    type Message: Send + 'static;

    /// Topic name, e.g. `"/sensor"`.
    fn topic(&self) -> &str;

    /// Protocol type name, e.g. `"std_msgs/Bool"`.
    fn message_type(&self) -> &str;

    /// Decode the `msg` field of an inbound `publish` frame.
    ///
    /// Runs on the network thread.
    ///
    /// # Errors
    ///
    /// Return [`BridgeError::Decode`] when the payload does not match the
    /// expected shape; the frame is then logged and dropped.
    fn decode(&self, payload: &Value) -> Result<Self::Message, BridgeError>;

    /// Hand a decoded message to the host.  Runs on the thread that calls
    /// [`RosbridgeClient::poll`][crate::RosbridgeClient::poll].
    fn deliver(&self, message: Self::Message, ctx: &mut C);
}

/// A topic the host publishes on.  Advertised on connect, unadvertised on
/// disconnect.
pub trait PublisherBinding: Send + Sync + 'static {
    fn topic(&self) -> &str;
    fn message_type(&self) -> &str;
}

/// Receiver of `service_response` results.
pub trait ServiceResponderBinding<C>: Send + Sync + 'static {
    /// Service name this responder was written for.
    fn topic(&self) -> &str;

    /// Service type name, e.g. `"rospy_tutorials/AddTwoInts"`.
    fn message_type(&self) -> &str;

    /// Hand a service result to the host.  `payload` is the JSON text of the
    /// response's `values` field, or empty when the response carried none.
    fn deliver(&self, service: &str, payload: &str, ctx: &mut C);
}

/// Object-safe view of a [`SubscriberBinding`] with its message type erased
/// so bindings of different message types share one registry.
pub(crate) trait DynSubscriber<C>: Send + Sync {
    fn topic(&self) -> &str;
    fn message_type(&self) -> &str;
    fn decode_erased(&self, payload: &Value) -> Result<Box<dyn Any + Send>, BridgeError>;
    fn deliver_erased(&self, message: Box<dyn Any + Send>, ctx: &mut C);
}

impl<C, B> DynSubscriber<C> for B
where
    B: SubscriberBinding<C>,
{
    fn topic(&self) -> &str {
        <B as SubscriberBinding<C>>::topic(self)
    }

    fn message_type(&self) -> &str {
        <B as SubscriberBinding<C>>::message_type(self)
    }

    fn decode_erased(&self, payload: &Value) -> Result<Box<dyn Any + Send>, BridgeError> {
        let message = <B as SubscriberBinding<C>>::decode(self, payload)?;
        Ok(Box::new(message))
    }

    fn deliver_erased(&self, message: Box<dyn Any + Send>, ctx: &mut C) {
        match message.downcast::<<B as SubscriberBinding<C>>::Message>() {
            Ok(message) => <B as SubscriberBinding<C>>::deliver(self, *message, ctx),
            Err(_) => error!(
                topic = %<B as SubscriberBinding<C>>::topic(self),
                "queued message does not match the binding's message type"
            ),
        }
    }
}

/// Instance-scoped registry of subscriber, publisher and service-responder
/// bindings.
///
/// Cloning is cheap: bindings are reference counted.  The connection takes a
/// clone on every connect so that teardown always mirrors the handshake.
pub struct BindingRegistry<C> {
    subscribers: Vec<Arc<dyn DynSubscriber<C>>>,
    publishers: Vec<Arc<dyn PublisherBinding>>,
    service_responder: Option<Arc<dyn ServiceResponderBinding<C>>>,
}

impl<C: 'static> BindingRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            publishers: Vec::new(),
            service_responder: None,
        }
    }

    /// Register a subscriber binding.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::InvalidBinding`] when the topic or message type is
    ///   missing.
    /// * [`BridgeError::DuplicateBinding`] when another subscriber already
    ///   owns the topic.
    pub fn register_subscriber<B>(&mut self, binding: B) -> Result<(), BridgeError>
    where
        B: SubscriberBinding<C>,
    {
        let topic = <B as SubscriberBinding<C>>::topic(&binding);
        let message_type = <B as SubscriberBinding<C>>::message_type(&binding);
        validate(topic, message_type)?;
        if self.find_subscriber(topic).is_some() {
            return Err(BridgeError::DuplicateBinding {
                topic: topic.to_string(),
            });
        }
        debug!(topic = %topic, message_type = %message_type, "subscriber registered");
        self.subscribers.push(Arc::new(binding));
        Ok(())
    }

    /// Register a publisher binding.
    ///
    /// # Errors
    ///
    /// Same as [`register_subscriber`][Self::register_subscriber], checked
    /// against other publishers.
    pub fn register_publisher<B>(&mut self, binding: B) -> Result<(), BridgeError>
    where
        B: PublisherBinding,
    {
        validate(binding.topic(), binding.message_type())?;
        if self.publishers.iter().any(|p| p.topic() == binding.topic()) {
            return Err(BridgeError::DuplicateBinding {
                topic: binding.topic().to_string(),
            });
        }
        debug!(topic = %binding.topic(), message_type = %binding.message_type(), "publisher registered");
        self.publishers.push(Arc::new(binding));
        Ok(())
    }

    /// Register the service responder, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidBinding`] when the service name or type
    /// is missing; the previous responder is then kept.
    pub fn register_service_responder<B>(&mut self, binding: B) -> Result<(), BridgeError>
    where
        B: ServiceResponderBinding<C>,
    {
        validate(binding.topic(), binding.message_type())?;
        if let Some(previous) = &self.service_responder {
            debug!(previous = %previous.topic(), service = %binding.topic(), "service responder replaced");
        }
        self.service_responder = Some(Arc::new(binding));
        Ok(())
    }

    pub(crate) fn find_subscriber(&self, topic: &str) -> Option<&Arc<dyn DynSubscriber<C>>> {
        self.subscribers.iter().find(|s| s.topic() == topic)
    }

    pub(crate) fn subscribers(&self) -> &[Arc<dyn DynSubscriber<C>>] {
        &self.subscribers
    }

    pub(crate) fn publishers(&self) -> &[Arc<dyn PublisherBinding>] {
        &self.publishers
    }

    pub(crate) fn service_responder(&self) -> Option<&Arc<dyn ServiceResponderBinding<C>>> {
        self.service_responder.as_ref()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of registered publishers.
    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }
}

impl<C: 'static> Default for BindingRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> Clone for BindingRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
            publishers: self.publishers.clone(),
            service_responder: self.service_responder.clone(),
        }
    }
}

fn validate(topic: &str, message_type: &str) -> Result<(), BridgeError> {
    if topic.trim().is_empty() {
        return Err(BridgeError::InvalidBinding {
            topic: topic.to_string(),
            capability: Capability::Topic,
        });
    }
    if !is_type_name(message_type) {
        return Err(BridgeError::InvalidBinding {
            topic: topic.to_string(),
            capability: Capability::MessageType,
        });
    }
    Ok(())
}

/// `package/Type` or `package/msg/Type`: no whitespace, at least one inner
/// separator.
fn is_type_name(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().any(char::is_whitespace)
        && name.contains('/')
        && !name.starts_with('/')
        && !name.ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlagSubscriber {
        topic: &'static str,
        message_type: &'static str,
    }

    impl SubscriberBinding<Vec<bool>> for FlagSubscriber {
        type Message = bool;

        fn topic(&self) -> &str {
            self.topic
        }
        fn message_type(&self) -> &str {
            self.message_type
        }
        fn decode(&self, payload: &Value) -> Result<bool, BridgeError> {
            payload
                .get("data")
                .and_then(Value::as_bool)
                .ok_or_else(|| BridgeError::Decode {
                    topic: self.topic.to_string(),
                    reason: "missing bool 'data'".to_string(),
                })
        }
        fn deliver(&self, message: bool, ctx: &mut Vec<bool>) {
            ctx.push(message);
        }
    }

    struct Advertised(&'static str, &'static str);

    impl PublisherBinding for Advertised {
        fn topic(&self) -> &str {
            self.0
        }
        fn message_type(&self) -> &str {
            self.1
        }
    }

    struct Responder(&'static str);

    impl ServiceResponderBinding<Vec<bool>> for Responder {
        fn topic(&self) -> &str {
            self.0
        }
        fn message_type(&self) -> &str {
            "std_srvs/Trigger"
        }
        fn deliver(&self, _service: &str, _payload: &str, _ctx: &mut Vec<bool>) {}
    }

    fn flag(topic: &'static str, message_type: &'static str) -> FlagSubscriber {
        FlagSubscriber {
            topic,
            message_type,
        }
    }

    #[test]
    fn register_valid_subscriber() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry.register_subscriber(flag("/sensor", "std_msgs/Bool")).unwrap();
        assert_eq!(registry.subscriber_count(), 1);
        assert!(registry.find_subscriber("/sensor").is_some());
    }

    #[test]
    fn subscriber_without_topic_is_rejected() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        let result = registry.register_subscriber(flag("  ", "std_msgs/Bool"));
        assert!(matches!(
            result,
            Err(BridgeError::InvalidBinding {
                capability: Capability::Topic,
                ..
            })
        ));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_without_message_type_is_rejected() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        for bad in ["", "Bool", "std msgs/Bool", "/Bool", "std_msgs/"] {
            let result = registry.register_subscriber(flag("/sensor", bad));
            assert!(
                matches!(
                    result,
                    Err(BridgeError::InvalidBinding {
                        capability: Capability::MessageType,
                        ..
                    })
                ),
                "type {bad:?} should be rejected, got {result:?}"
            );
        }
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn ros2_style_type_names_are_accepted() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry
            .register_subscriber(flag("/sensor", "std_msgs/msg/Bool"))
            .unwrap();
    }

    #[test]
    fn duplicate_subscriber_topic_is_rejected() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry.register_subscriber(flag("/sensor", "std_msgs/Bool")).unwrap();
        let result = registry.register_subscriber(flag("/sensor", "std_msgs/Bool"));
        assert!(matches!(result, Err(BridgeError::DuplicateBinding { .. })));
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn publishers_keep_registration_order() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry
            .register_publisher(Advertised("/b", "std_msgs/Bool"))
            .unwrap();
        registry
            .register_publisher(Advertised("/a", "std_msgs/Bool"))
            .unwrap();
        let topics: Vec<&str> = registry.publishers().iter().map(|p| p.topic()).collect();
        assert_eq!(topics, vec!["/b", "/a"]);
    }

    #[test]
    fn invalid_publisher_is_rejected() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        let result = registry.register_publisher(Advertised("/cmd", ""));
        assert!(matches!(result, Err(BridgeError::InvalidBinding { .. })));
        assert_eq!(registry.publisher_count(), 0);
    }

    #[test]
    fn second_service_responder_overwrites_first() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry.register_service_responder(Responder("/first")).unwrap();
        registry.register_service_responder(Responder("/second")).unwrap();
        assert_eq!(registry.service_responder().unwrap().topic(), "/second");
    }

    #[test]
    fn invalid_service_responder_keeps_previous() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry.register_service_responder(Responder("/first")).unwrap();
        assert!(registry.register_service_responder(Responder("")).is_err());
        assert_eq!(registry.service_responder().unwrap().topic(), "/first");
    }

    #[test]
    fn erased_subscriber_roundtrips_through_any() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry.register_subscriber(flag("/sensor", "std_msgs/Bool")).unwrap();
        let binding = registry.find_subscriber("/sensor").unwrap();

        let message = binding
            .decode_erased(&serde_json::json!({"data": true}))
            .unwrap();
        let mut delivered = Vec::new();
        binding.deliver_erased(message, &mut delivered);
        assert_eq!(delivered, vec![true]);
    }

    #[test]
    fn mismatched_erased_message_is_not_delivered() {
        let mut registry = BindingRegistry::<Vec<bool>>::new();
        registry.register_subscriber(flag("/sensor", "std_msgs/Bool")).unwrap();
        let binding = registry.find_subscriber("/sensor").unwrap();

        let mut delivered = Vec::new();
        binding.deliver_erased(Box::new("not a bool"), &mut delivered);
        assert!(delivered.is_empty());
    }
}
