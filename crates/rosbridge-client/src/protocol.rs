//! rosbridge wire codec.
//!
//! Outbound operations are rendered from a fixed-shape [`Operation`] enum so
//! that every frame carries `"op"` first, followed by its fields in protocol
//! order:
//!
//! | Operation | Frame |
//! |---|---|
//! | subscribe | `{"op":"subscribe","topic":T,"type":Y}` |
//! | unsubscribe | `{"op":"unsubscribe","topic":T}` |
//! | advertise | `{"op":"advertise","topic":T,"type":Y}` |
//! | unadvertise | `{"op":"unadvertise","topic":T}` |
//! | publish | `{"op":"publish","topic":T,"msg":P}` |
//! | call_service | `{"op":"call_service","service":S,"args":P}` |
//!
//! Inbound frames are parsed into a generic [`Envelope`]: the operation name
//! plus whatever other fields the frame carried.  The codec keeps no state.

use rosbridge_types::BridgeError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Inbound operation carrying a message for a subscribed topic.
pub const OP_PUBLISH: &str = "publish";
/// Inbound operation carrying the result of a `call_service`.
pub const OP_SERVICE_RESPONSE: &str = "service_response";

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Operation<'a> {
    Subscribe {
        topic: &'a str,
        #[serde(rename = "type")]
        message_type: &'a str,
    },
    Unsubscribe {
        topic: &'a str,
    },
    Advertise {
        topic: &'a str,
        #[serde(rename = "type")]
        message_type: &'a str,
    },
    Unadvertise {
        topic: &'a str,
    },
    Publish {
        topic: &'a str,
        msg: &'a Value,
    },
    CallService {
        service: &'a str,
        args: &'a Value,
    },
}

fn render(op: &Operation<'_>) -> Result<String, BridgeError> {
    serde_json::to_string(op).map_err(|e| BridgeError::Serialization(e.to_string()))
}

/// Render a `subscribe` frame.
pub fn subscribe(topic: &str, message_type: &str) -> Result<String, BridgeError> {
    render(&Operation::Subscribe {
        topic,
        message_type,
    })
}

/// Render an `unsubscribe` frame.
pub fn unsubscribe(topic: &str) -> Result<String, BridgeError> {
    render(&Operation::Unsubscribe { topic })
}

/// Render an `advertise` frame.
pub fn advertise(topic: &str, message_type: &str) -> Result<String, BridgeError> {
    render(&Operation::Advertise {
        topic,
        message_type,
    })
}

/// Render an `unadvertise` frame.
pub fn unadvertise(topic: &str) -> Result<String, BridgeError> {
    render(&Operation::Unadvertise { topic })
}

/// Render a `publish` frame; `msg` is embedded as a JSON value, not a string.
pub fn publish(topic: &str, msg: &Value) -> Result<String, BridgeError> {
    render(&Operation::Publish { topic, msg })
}

/// Render a `call_service` frame.
pub fn call_service(service: &str, args: &Value) -> Result<String, BridgeError> {
    render(&Operation::CallService { service, args })
}

/// Parse payload text supplied by the host (e.g. service arguments) into a
/// JSON value suitable for embedding in a frame.
pub fn payload_from_text(text: &str) -> Result<Value, BridgeError> {
    serde_json::from_str(text)
        .map_err(|e| BridgeError::Serialization(format!("payload is not valid JSON: {e}")))
}

/// A parsed inbound frame: operation name plus its remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    op: String,
    fields: Map<String, Value>,
}

impl Envelope {
    /// Parse wire text into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Protocol`] when the text is blank, is not
    /// valid JSON, is not a JSON object, is an empty object, or lacks a
    /// string `op` field.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        if text.trim().is_empty() {
            return Err(BridgeError::Protocol("empty envelope".to_string()));
        }
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BridgeError::Protocol(format!("malformed envelope: {e}")))?;
        let Value::Object(mut fields) = value else {
            return Err(BridgeError::Protocol(
                "envelope is not a JSON object".to_string(),
            ));
        };
        if fields.is_empty() {
            return Err(BridgeError::Protocol("empty envelope".to_string()));
        }
        let op = match fields.remove("op") {
            Some(Value::String(op)) => op,
            Some(_) => {
                return Err(BridgeError::Protocol("envelope 'op' is not a string".to_string()));
            }
            None => return Err(BridgeError::Protocol("envelope has no 'op'".to_string())),
        };
        Ok(Self { op, fields })
    }

    /// The operation name, e.g. `"publish"`.
    pub fn op(&self) -> &str {
        &self.op
    }

    /// Raw access to any other field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A field that must be a JSON string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}
