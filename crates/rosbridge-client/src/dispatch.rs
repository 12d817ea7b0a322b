//! Inbound dispatch: one call per text frame, always on the network thread.
//!
//! Nothing here returns an error to the caller.  Malformed frames, decode
//! failures and unknown operations are logged and dropped; the connection
//! stays up.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, trace, warn};

use crate::delivery::{DeliveryTask, Inbox, Offered, PendingServiceResult};
use crate::protocol::{Envelope, OP_PUBLISH, OP_SERVICE_RESPONSE};
use crate::registry::BindingRegistry;

/// What happened to a single inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
    /// Decoded and placed on the delivery queue.
    Queued(Offered),
    /// Stored as the pending service result.
    ServiceResult,
    /// A `publish` for a topic nobody subscribed to.
    Unrouted,
    /// Malformed, undecodable or unsupported; logged and discarded.
    Dropped,
}

pub(crate) struct Dispatcher<C> {
    registry: BindingRegistry<C>,
    inbox: Arc<Inbox<C>>,
}

impl<C: 'static> Dispatcher<C> {
    pub(crate) fn new(registry: BindingRegistry<C>, inbox: Arc<Inbox<C>>) -> Self {
        Self { registry, inbox }
    }

    pub(crate) fn dispatch(&self, text: &str) -> Dispatched {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "dropping inbound frame");
                return Dispatched::Dropped;
            }
        };

        match envelope.op() {
            OP_PUBLISH => self.route_publish(&envelope),
            OP_SERVICE_RESPONSE => self.store_service_response(&envelope),
            other => {
                warn!(op = %other, "unsupported inbound operation");
                Dispatched::Dropped
            }
        }
    }

    fn route_publish(&self, envelope: &Envelope) -> Dispatched {
        let Some(topic) = envelope.str_field("topic") else {
            error!("publish frame without a topic");
            return Dispatched::Dropped;
        };
        let Some(binding) = self.registry.find_subscriber(topic) else {
            trace!(topic = %topic, "no subscriber for topic");
            return Dispatched::Unrouted;
        };

        let payload = envelope.field("msg").unwrap_or(&Value::Null);
        // A panicking decoder must not take the network thread down with it.
        let decoded = catch_unwind(AssertUnwindSafe(|| binding.decode_erased(payload)));
        let message = match decoded {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                warn!(topic = %topic, error = %e, "failed to decode message");
                return Dispatched::Dropped;
            }
            Err(_) => {
                error!(topic = %topic, "decoder panicked; message dropped");
                return Dispatched::Dropped;
            }
        };

        let offered = self.inbox.offer(DeliveryTask {
            topic: topic.to_string(),
            binding: Arc::clone(binding),
            message,
            received_at: Utc::now(),
        });
        if offered == Offered::Replaced {
            trace!(topic = %topic, "replaced undelivered message");
        }
        Dispatched::Queued(offered)
    }

    fn store_service_response(&self, envelope: &Envelope) -> Dispatched {
        let Some(service) = envelope.str_field("service") else {
            error!("service_response frame without a service name");
            return Dispatched::Dropped;
        };
        let payload = match envelope.field("values") {
            None | Some(Value::Null) => String::new(),
            Some(values) => values.to_string(),
        };
        let replaced = self.inbox.store_service_result(PendingServiceResult {
            service: service.to_string(),
            payload,
            received_at: Utc::now(),
        });
        if let Some(previous) = replaced {
            warn!(
                service = %service,
                previous = %previous.service,
                "unconsumed service result overwritten"
            );
        }
        Dispatched::ServiceResult
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriberBinding;
    use rosbridge_types::BridgeError;

    struct Reading(&'static str);

    impl SubscriberBinding<Vec<f64>> for Reading {
        type Message = f64;

        fn topic(&self) -> &str {
            self.0
        }
        fn message_type(&self) -> &str {
            "std_msgs/Float64"
        }
        fn decode(&self, payload: &Value) -> Result<f64, BridgeError> {
            if payload.get("explode").is_some() {
                panic!("decoder blew up");
            }
            payload
                .get("data")
                .and_then(Value::as_f64)
                .ok_or_else(|| BridgeError::Decode {
                    topic: self.0.to_string(),
                    reason: "missing 'data'".to_string(),
                })
        }
        fn deliver(&self, message: f64, ctx: &mut Vec<f64>) {
            ctx.push(message);
        }
    }

    fn dispatcher() -> (Dispatcher<Vec<f64>>, Arc<Inbox<Vec<f64>>>) {
        let mut registry = BindingRegistry::new();
        registry.register_subscriber(Reading("/sensor")).unwrap();
        registry.register_subscriber(Reading("/other")).unwrap();
        let inbox = Arc::new(Inbox::new());
        (Dispatcher::new(registry, Arc::clone(&inbox)), inbox)
    }

    fn deliver_next(inbox: &Inbox<Vec<f64>>) -> Vec<f64> {
        let mut delivered = Vec::new();
        if let Some(task) = inbox.drain() {
            task.binding.deliver_erased(task.message, &mut delivered);
        }
        delivered
    }

    #[test]
    fn publish_for_subscribed_topic_is_queued() {
        let (dispatcher, inbox) = dispatcher();
        let outcome =
            dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"data":1.5}}"#);
        assert_eq!(outcome, Dispatched::Queued(Offered::Appended));
        assert_eq!(deliver_next(&inbox), vec![1.5]);
    }

    #[test]
    fn second_publish_replaces_first() {
        let (dispatcher, inbox) = dispatcher();
        dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"data":1.0}}"#);
        dispatcher.dispatch(r#"{"op":"publish","topic":"/other","msg":{"data":9.0}}"#);
        let outcome =
            dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"data":2.0}}"#);

        assert_eq!(outcome, Dispatched::Queued(Offered::Replaced));
        assert_eq!(inbox.queued_topics(), vec!["/sensor", "/other"]);
        assert_eq!(deliver_next(&inbox), vec![2.0]);
    }

    #[test]
    fn unknown_topic_is_ignored() {
        let (dispatcher, inbox) = dispatcher();
        let outcome =
            dispatcher.dispatch(r#"{"op":"publish","topic":"/future","msg":{"data":1.0}}"#);
        assert_eq!(outcome, Dispatched::Unrouted);
        assert_eq!(inbox.queued(), 0);
    }

    #[test]
    fn topic_match_is_exact() {
        let (dispatcher, inbox) = dispatcher();
        dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor/","msg":{"data":1.0}}"#);
        dispatcher.dispatch(r#"{"op":"publish","topic":"sensor","msg":{"data":1.0}}"#);
        assert_eq!(inbox.queued(), 0);
    }

    #[test]
    fn malformed_frame_leaves_state_untouched() {
        let (dispatcher, inbox) = dispatcher();
        dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"data":1.0}}"#);
        dispatcher.dispatch(r#"{"op":"service_response","service":"/a","values":{}}"#);

        let outcome = dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"da"#);

        assert_eq!(outcome, Dispatched::Dropped);
        assert_eq!(inbox.queued_topics(), vec!["/sensor"]);
        assert_eq!(inbox.peek_service_result().unwrap().payload, "{}");
        assert_eq!(deliver_next(&inbox), vec![1.0]);
    }

    #[test]
    fn blank_and_empty_frames_are_dropped() {
        let (dispatcher, inbox) = dispatcher();
        assert_eq!(dispatcher.dispatch(""), Dispatched::Dropped);
        assert_eq!(dispatcher.dispatch("{}"), Dispatched::Dropped);
        assert_eq!(inbox.queued(), 0);
    }

    #[test]
    fn decode_failure_is_dropped() {
        let (dispatcher, inbox) = dispatcher();
        let outcome =
            dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"data":"nope"}}"#);
        assert_eq!(outcome, Dispatched::Dropped);
        assert_eq!(inbox.queued(), 0);
    }

    #[test]
    fn panicking_decoder_is_contained() {
        let (dispatcher, inbox) = dispatcher();
        let outcome =
            dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"explode":true}}"#);
        assert_eq!(outcome, Dispatched::Dropped);
        assert_eq!(inbox.queued(), 0);

        // The dispatcher keeps working afterwards.
        let outcome =
            dispatcher.dispatch(r#"{"op":"publish","topic":"/sensor","msg":{"data":3.0}}"#);
        assert_eq!(outcome, Dispatched::Queued(Offered::Appended));
    }

    #[test]
    fn service_response_is_stored_as_json_text() {
        let (dispatcher, inbox) = dispatcher();
        let outcome = dispatcher
            .dispatch(r#"{"op":"service_response","service":"/add_two_ints","values":{"sum":3}}"#);
        assert_eq!(outcome, Dispatched::ServiceResult);

        let result = inbox.take_service_result().unwrap();
        assert_eq!(result.service, "/add_two_ints");
        assert_eq!(result.payload, r#"{"sum":3}"#);
    }

    #[test]
    fn service_response_without_values_has_empty_payload() {
        let (dispatcher, inbox) = dispatcher();
        dispatcher.dispatch(r#"{"op":"service_response","service":"/reset"}"#);
        assert_eq!(inbox.take_service_result().unwrap().payload, "");
    }

    #[test]
    fn newer_service_response_overwrites_older() {
        let (dispatcher, inbox) = dispatcher();
        dispatcher.dispatch(r#"{"op":"service_response","service":"/a","values":{"n":1}}"#);
        dispatcher.dispatch(r#"{"op":"service_response","service":"/b","values":{"n":2}}"#);
        let result = inbox.take_service_result().unwrap();
        assert_eq!(result.service, "/b");
        assert!(inbox.take_service_result().is_none());
    }

    #[test]
    fn unsupported_operation_is_dropped() {
        let (dispatcher, inbox) = dispatcher();
        let outcome = dispatcher.dispatch(r#"{"op":"status","level":"error","msg":"boom"}"#);
        assert_eq!(outcome, Dispatched::Dropped);
        assert_eq!(inbox.queued(), 0);
        assert!(inbox.peek_service_result().is_none());
    }
}
