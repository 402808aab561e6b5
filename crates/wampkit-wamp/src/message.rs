//! WAMP v1 message types and decoding
//!
//! Every WAMP message is a JSON array whose first element is the type code.
//! Only PREFIX, CALL, SUBSCRIBE, UNSUBSCRIBE and PUBLISH may be sent by a
//! client; the remaining codes are server-to-client only.

use serde::{Serialize, Serializer};
use serde_json::Value;
use wampkit_core::{Error, Result};

/// WAMP protocol version announced in WELCOME
pub const PROTOCOL_VERSION: u8 = 1;

/// WAMP v1 message type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Welcome,
    Prefix,
    Call,
    CallResult,
    CallError,
    Subscribe,
    Unsubscribe,
    Publish,
    Event,
}

impl MessageType {
    /// The numeric type code
    pub fn code(self) -> u8 {
        match self {
            Self::Welcome => 0,
            Self::Prefix => 1,
            Self::Call => 2,
            Self::CallResult => 3,
            Self::CallError => 4,
            Self::Subscribe => 5,
            Self::Unsubscribe => 6,
            Self::Publish => 7,
            Self::Event => 8,
        }
    }

    /// Look up a type code
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Welcome,
            1 => Self::Prefix,
            2 => Self::Call,
            3 => Self::CallResult,
            4 => Self::CallError,
            5 => Self::Subscribe,
            6 => Self::Unsubscribe,
            7 => Self::Publish,
            8 => Self::Event,
            _ => return None,
        })
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Who a PUBLISH excludes from delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclude {
    /// The listed session ids
    Sessions(Vec<String>),
    /// The publishing session
    Publisher,
}

/// A decoded client message
#[derive(Debug, Clone, PartialEq)]
pub enum WampAction {
    Prefix {
        prefix: String,
        uri: String,
    },
    Call {
        call_id: String,
        proc_uri: String,
        params: Vec<Value>,
    },
    Subscribe {
        topic_uri: String,
    },
    Unsubscribe {
        topic_uri: String,
    },
    Publish {
        topic_uri: String,
        event: Value,
        exclude: Exclude,
        eligible: Vec<String>,
    },
}

/// A string or numeric identifier, as a string
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_uri(message: &[Value], index: usize, name: &str) -> Result<String> {
    match message.get(index) {
        Some(Value::String(uri)) => Ok(uri.clone()),
        Some(_) => Err(Error::invalid_message(format!("{name} must be a string"))),
        None => Err(Error::invalid_message(format!("missing {name}"))),
    }
}

/// Loose truthiness of a JSON value
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn session_list(values: &[Value]) -> Vec<String> {
    values.iter().filter_map(identifier).collect()
}

/// Decode one client message
pub fn decode(data: &[u8]) -> Result<WampAction> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|err| Error::invalid_message(format!("payload is not JSON: {err}")))?;
    let Value::Array(message) = value else {
        return Err(Error::invalid_message("message must be a JSON array"));
    };

    let Some(type_code) = message.first() else {
        return Err(Error::invalid_message("message is empty"));
    };
    let type_code = type_code
        .as_i64()
        .ok_or_else(|| Error::invalid_message("message type must be an integer"))?;

    if let Some(id) = message.get(1) {
        if identifier(id).is_none() {
            return Err(Error::invalid_message(
                "element 1 must be a string or numeric identifier",
            ));
        }
    }

    match MessageType::from_code(type_code) {
        Some(MessageType::Prefix) => Ok(WampAction::Prefix {
            prefix: message
                .get(1)
                .and_then(identifier)
                .ok_or_else(|| Error::invalid_message("missing prefix"))?,
            uri: required_uri(&message, 2, "prefix URI")?,
        }),
        Some(MessageType::Call) => {
            let call_id = message
                .get(1)
                .and_then(identifier)
                .ok_or_else(|| Error::invalid_message("missing call id"))?;
            let proc_uri = required_uri(&message, 2, "procedure URI")?;
            let mut params: Vec<Value> = message.into_iter().skip(3).collect();
            if params.len() == 1 && params[0].is_array() {
                if let Some(Value::Array(inner)) = params.pop() {
                    params = inner;
                }
            }
            Ok(WampAction::Call {
                call_id,
                proc_uri,
                params,
            })
        }
        Some(MessageType::Subscribe) => Ok(WampAction::Subscribe {
            topic_uri: message
                .get(1)
                .and_then(identifier)
                .ok_or_else(|| Error::invalid_message("missing topic URI"))?,
        }),
        Some(MessageType::Unsubscribe) => Ok(WampAction::Unsubscribe {
            topic_uri: message
                .get(1)
                .and_then(identifier)
                .ok_or_else(|| Error::invalid_message("missing topic URI"))?,
        }),
        Some(MessageType::Publish) => {
            let topic_uri = message
                .get(1)
                .and_then(identifier)
                .ok_or_else(|| Error::invalid_message("missing topic URI"))?;
            let event = message
                .get(2)
                .cloned()
                .ok_or_else(|| Error::invalid_message("missing event"))?;
            let exclude = match message.get(3) {
                Some(Value::Array(sessions)) => Exclude::Sessions(session_list(sessions)),
                Some(value) if is_truthy(value) => Exclude::Publisher,
                _ => Exclude::Sessions(Vec::new()),
            };
            let eligible = match message.get(4) {
                Some(Value::Array(sessions)) => session_list(sessions),
                None | Some(Value::Null) => Vec::new(),
                Some(_) => return Err(Error::invalid_message("eligible must be a list")),
            };
            Ok(WampAction::Publish {
                topic_uri,
                event,
                exclude,
                eligible,
            })
        }
        _ => Err(Error::UnsupportedMessageType(type_code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_json(value: Value) -> Result<WampAction> {
        decode(value.to_string().as_bytes())
    }

    #[test]
    fn type_codes_serialize_as_numbers() {
        let encoded = serde_json::to_string(&(MessageType::Event, "topic", 1)).unwrap();
        assert_eq!(encoded, "[8,\"topic\",1]");
        assert_eq!(MessageType::from_code(4), Some(MessageType::CallError));
        assert_eq!(MessageType::from_code(9), None);
    }

    #[test]
    fn decodes_prefix() {
        assert_eq!(
            decode_json(json!([1, "calc", "http://example.com/simple/calc#"])).unwrap(),
            WampAction::Prefix {
                prefix: "calc".into(),
                uri: "http://example.com/simple/calc#".into(),
            }
        );
    }

    #[test]
    fn call_params_follow_the_uri() {
        assert_eq!(
            decode_json(json!([2, "id1", "calc:add", 1, 2])).unwrap(),
            WampAction::Call {
                call_id: "id1".into(),
                proc_uri: "calc:add".into(),
                params: vec![json!(1), json!(2)],
            }
        );
    }

    #[test]
    fn single_array_param_is_unwrapped() {
        assert_eq!(
            decode_json(json!([2, 7, "calc:sum", [1, 2, 3]])).unwrap(),
            WampAction::Call {
                call_id: "7".into(),
                proc_uri: "calc:sum".into(),
                params: vec![json!(1), json!(2), json!(3)],
            }
        );
    }

    #[test]
    fn call_without_uri_is_invalid() {
        assert!(matches!(
            decode_json(json!([2, "id1"])),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn publish_exclude_forms() {
        let publish = |exclude: Value| match decode_json(json!([7, "t", "hi", exclude])).unwrap() {
            WampAction::Publish { exclude, .. } => exclude,
            other => panic!("unexpected {other:?}"),
        };

        assert_eq!(publish(json!(true)), Exclude::Publisher);
        assert_eq!(publish(json!(1)), Exclude::Publisher);
        assert_eq!(publish(json!(false)), Exclude::Sessions(vec![]));
        assert_eq!(publish(json!(null)), Exclude::Sessions(vec![]));
        assert_eq!(
            publish(json!(["a", "b"])),
            Exclude::Sessions(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn publish_defaults() {
        assert_eq!(
            decode_json(json!([7, "t", {"text": "hi"}])).unwrap(),
            WampAction::Publish {
                topic_uri: "t".into(),
                event: json!({"text": "hi"}),
                exclude: Exclude::Sessions(vec![]),
                eligible: vec![],
            }
        );
    }

    #[test]
    fn rejects_non_arrays_and_bad_ids() {
        assert!(matches!(decode(b"{\"a\":1}"), Err(Error::InvalidMessage(_))));
        assert!(matches!(decode(b"not json"), Err(Error::InvalidMessage(_))));
        assert!(matches!(decode(b"[]"), Err(Error::InvalidMessage(_))));
        assert!(matches!(
            decode_json(json!([5, {"topic": 1}])),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn server_only_codes_are_unsupported() {
        assert!(matches!(
            decode_json(json!([0, "session", 1, "server"])),
            Err(Error::UnsupportedMessageType(0))
        ));
        assert!(matches!(
            decode_json(json!([8, "topic", "event"])),
            Err(Error::UnsupportedMessageType(8))
        ));
        assert!(matches!(
            decode_json(json!([42])),
            Err(Error::UnsupportedMessageType(42))
        ));
    }
}
