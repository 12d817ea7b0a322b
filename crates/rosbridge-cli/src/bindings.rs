//! Sample `std_msgs` bindings used by the demo host.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use colored::Colorize;
use rosbridge_client::{
    PublisherBinding, RosbridgeClient, ServiceResponderBinding, SubscriberBinding,
};
use rosbridge_types::BridgeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic the demo host publishes its heartbeat on.
pub const HEARTBEAT_TOPIC: &str = "/rosbridge_cli/heartbeat";

/// Host context handed to every callback.
#[derive(Debug, Default)]
pub struct Dashboard {
    /// Latest value seen per topic, rendered for display.
    pub latest: BTreeMap<String, String>,
    pub messages: u64,
    pub service_results: Vec<(String, String)>,
}

/// The `{"data": ...}` shape shared by the simple `std_msgs` types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdData<T> {
    pub data: T,
}

/// A payload type carried in [`StdData`].
pub trait StdPayload: DeserializeOwned + fmt::Display + Send + 'static {
    const MESSAGE_TYPE: &'static str;
}

impl StdPayload for bool {
    const MESSAGE_TYPE: &'static str = "std_msgs/Bool";
}

impl StdPayload for f64 {
    const MESSAGE_TYPE: &'static str = "std_msgs/Float64";
}

impl StdPayload for String {
    const MESSAGE_TYPE: &'static str = "std_msgs/String";
}

/// Prints every message received on `topic` and records it on the
/// [`Dashboard`].
pub struct StdSubscriber<T> {
    topic: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> StdSubscriber<T> {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            _payload: PhantomData,
        }
    }
}

impl<T: StdPayload> SubscriberBinding<Dashboard> for StdSubscriber<T> {
    type Message = T;

    fn topic(&self) -> &str {
        &self.topic
    }

    fn message_type(&self) -> &str {
        T::MESSAGE_TYPE
    }

    fn decode(&self, payload: &Value) -> Result<T, BridgeError> {
        StdData::<T>::deserialize(payload)
            .map(|msg| msg.data)
            .map_err(|e| BridgeError::Decode {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })
    }

    fn deliver(&self, message: T, dashboard: &mut Dashboard) {
        let rendered = message.to_string();
        println!("  {} {} {}", "◂".cyan(), self.topic.bold(), rendered);
        dashboard.messages += 1;
        dashboard.latest.insert(self.topic.clone(), rendered);
    }
}

/// `std_msgs/String` heartbeat advertised on [`HEARTBEAT_TOPIC`].
pub struct Heartbeat;

impl Heartbeat {
    pub fn message(beat: u64) -> StdData<String> {
        StdData {
            data: format!("rosbridge-cli alive #{beat}"),
        }
    }
}

impl PublisherBinding for Heartbeat {
    fn topic(&self) -> &str {
        HEARTBEAT_TOPIC
    }

    fn message_type(&self) -> &str {
        <String as StdPayload>::MESSAGE_TYPE
    }
}

/// Prints service results as they arrive.
pub struct PrintingResponder {
    service: String,
    service_type: String,
}

impl PrintingResponder {
    pub fn new(service: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            service_type: service_type.into(),
        }
    }
}

impl ServiceResponderBinding<Dashboard> for PrintingResponder {
    fn topic(&self) -> &str {
        &self.service
    }

    fn message_type(&self) -> &str {
        &self.service_type
    }

    fn deliver(&self, service: &str, payload: &str, dashboard: &mut Dashboard) {
        let shown = if payload.is_empty() { "(no values)" } else { payload };
        println!("  {} {} {}", "⇠".green(), service.bold(), shown);
        dashboard
            .service_results
            .push((service.to_string(), payload.to_string()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command-line subscriptions
// ─────────────────────────────────────────────────────────────────────────────

/// The `std_msgs` types the demo host can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdKind {
    Bool,
    Float64,
    String,
}

impl FromStr for StdKind {
    type Err = String;

    /// Accepts `Bool` or `std_msgs/Bool` (any case), likewise for the others.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix("std_msgs/").unwrap_or(s);
        match name.to_ascii_lowercase().as_str() {
            "bool" => Ok(Self::Bool),
            "float64" => Ok(Self::Float64),
            "string" => Ok(Self::String),
            _ => Err(format!(
                "unsupported message type '{s}' (expected Bool, Float64 or String)"
            )),
        }
    }
}

/// One `topic:type` command-line argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub kind: StdKind,
}

impl FromStr for Subscription {
    type Err = String;

    fn from_str(arg: &str) -> Result<Self, Self::Err> {
        let (topic, kind) = arg
            .split_once(':')
            .ok_or_else(|| format!("expected topic:type, got '{arg}'"))?;
        if topic.trim().is_empty() {
            return Err(format!("missing topic in '{arg}'"));
        }
        Ok(Self {
            topic: topic.to_string(),
            kind: kind.parse()?,
        })
    }
}

impl Subscription {
    pub fn register(&self, client: &mut RosbridgeClient<Dashboard>) -> Result<(), BridgeError> {
        match self.kind {
            StdKind::Bool => client.register_subscriber(StdSubscriber::<bool>::new(&self.topic)),
            StdKind::Float64 => client.register_subscriber(StdSubscriber::<f64>::new(&self.topic)),
            StdKind::String => {
                client.register_subscriber(StdSubscriber::<String>::new(&self.topic))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_subscriber_decodes_data_field() {
        let sub = StdSubscriber::<bool>::new("/flag");
        assert_eq!(sub.decode(&json!({"data": true})).unwrap(), true);
        assert_eq!(sub.message_type(), "std_msgs/Bool");
    }

    #[test]
    fn wrong_payload_shape_is_a_decode_error() {
        let sub = StdSubscriber::<f64>::new("/speed");
        let err = sub.decode(&json!({"data": "fast"})).unwrap_err();
        assert!(matches!(err, BridgeError::Decode { ref topic, .. } if topic == "/speed"));
        assert!(sub.decode(&json!({})).is_err());
    }

    #[test]
    fn deliver_records_latest_value() {
        let sub = StdSubscriber::<String>::new("/chatter");
        let mut dashboard = Dashboard::default();
        sub.deliver("hello".to_string(), &mut dashboard);
        sub.deliver("world".to_string(), &mut dashboard);
        assert_eq!(dashboard.messages, 2);
        assert_eq!(dashboard.latest["/chatter"], "world");
    }

    #[test]
    fn responder_records_results() {
        let responder = PrintingResponder::new("/add_two_ints", "rospy_tutorials/AddTwoInts");
        let mut dashboard = Dashboard::default();
        responder.deliver("/add_two_ints", r#"{"sum":3}"#, &mut dashboard);
        assert_eq!(
            dashboard.service_results,
            vec![("/add_two_ints".to_string(), r#"{"sum":3}"#.to_string())]
        );
    }

    #[test]
    fn heartbeat_serializes_as_std_string() {
        let value = serde_json::to_value(Heartbeat::message(7)).unwrap();
        assert_eq!(value, json!({"data": "rosbridge-cli alive #7"}));
        assert_eq!(Heartbeat.topic(), HEARTBEAT_TOPIC);
    }

    #[test]
    fn subscription_args_parse() {
        let sub: Subscription = "/flag:std_msgs/Bool".parse().unwrap();
        assert_eq!(sub.topic, "/flag");
        assert_eq!(sub.kind, StdKind::Bool);

        let sub: Subscription = "/speed:float64".parse().unwrap();
        assert_eq!(sub.kind, StdKind::Float64);

        assert!("/flag".parse::<Subscription>().is_err());
        assert!(":Bool".parse::<Subscription>().is_err());
        assert!("/pose:geometry_msgs/Pose".parse::<Subscription>().is_err());
    }

    #[test]
    fn subscriptions_register_on_client() {
        let mut client = RosbridgeClient::<Dashboard>::new(&Default::default());
        let subs: Vec<Subscription> = ["/a:Bool", "/b:Float64", "/c:String"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        for sub in &subs {
            sub.register(&mut client).unwrap();
        }
        assert!(matches!(
            subs[0].register(&mut client),
            Err(BridgeError::DuplicateBinding { .. })
        ));
    }
}
