//! Turns a decoded payload into notification text and extraction snippets
//!
//! Phone-side forwarders usually publish a JSON object whose `msg` field holds
//! the SMS body, with sender and timestamp fields next to it. Plain text
//! payloads are used as they are.

use serde_json::Value;

use crate::mqtt::message_manager::InboundMessage;

pub const EMPTY_BODY: &str = "<empty message>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    /// Headline used when no code is found
    pub default_headline: String,
    pub body: String,
    /// Texts searched for a verification code, in priority order
    pub snippets: Vec<String>,
}

impl MessageContent {
    pub fn from_message(message: &InboundMessage) -> Self {
        if message.payload().is_hex() {
            // a hex dump is not message text
            return Self {
                default_headline: default_headline(message.topic()),
                body: message.payload().text().to_string(),
                snippets: Vec::new(),
            };
        }
        Self::parse(message.topic(), message.payload().text())
    }

    pub fn parse(topic: &str, payload: &str) -> Self {
        let default_headline = default_headline(topic);
        let raw_text = payload.trim();

        if raw_text.is_empty() {
            return Self {
                default_headline,
                body: EMPTY_BODY.to_string(),
                snippets: Vec::new(),
            };
        }

        let mut snippets = Vec::new();
        let body = match serde_json::from_str::<Value>(raw_text) {
            Ok(Value::Object(map)) => {
                let mut lines = Vec::new();
                if let Some(Value::String(msg)) = map.get("msg") {
                    let msg = msg.trim();
                    if !msg.is_empty() {
                        lines.push(msg.to_string());
                        snippets.push(msg.to_string());
                    }
                }

                for (key, value) in &map {
                    if key == "msg" {
                        continue;
                    }
                    match value {
                        Value::Null => {}
                        Value::Object(_) | Value::Array(_) => {
                            let serialized = value.to_string();
                            lines.push(format!("{}: {}", key, serialized));
                            snippets.push(serialized);
                        }
                        Value::String(s) => {
                            lines.push(format!("{}: {}", key, s));
                            snippets.push(s.clone());
                        }
                        other => lines.push(format!("{}: {}", key, other)),
                    }
                }

                if snippets.is_empty() {
                    snippets.push(raw_text.to_string());
                }
                if lines.is_empty() {
                    raw_text.to_string()
                } else {
                    lines.join("\n")
                }
            }
            Ok(value @ Value::Array(_)) => {
                let pretty =
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                snippets.push(pretty.clone());
                pretty
            }
            Ok(value) => {
                let compact = value.to_string();
                snippets.push(compact.clone());
                compact
            }
            Err(_) => {
                snippets.push(raw_text.to_string());
                raw_text.to_string()
            }
        };

        snippets.push(body.clone());

        Self {
            default_headline,
            body,
            snippets,
        }
    }

    pub fn snippets(&self) -> impl Iterator<Item = &str> {
        self.snippets.iter().map(String::as_str)
    }
}

fn default_headline(topic: &str) -> String {
    if topic.is_empty() {
        "MQTT: <unknown>".to_string()
    } else {
        format!("MQTT: {}", topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::message_manager::{PayloadDecoder, RawPublish};

    #[test]
    fn plain_text_is_body_and_snippet() {
        let content = MessageContent::parse("sms/inbox", "  您的验证码是583920  ");
        assert_eq!(content.default_headline, "MQTT: sms/inbox");
        assert_eq!(content.body, "您的验证码是583920");
        assert_eq!(content.snippets, vec!["您的验证码是583920", "您的验证码是583920"]);
    }

    #[test]
    fn empty_payload_has_placeholder_body() {
        let content = MessageContent::parse("", "   ");
        assert_eq!(content.default_headline, "MQTT: <unknown>");
        assert_eq!(content.body, EMPTY_BODY);
        assert!(content.snippets.is_empty());
    }

    #[test]
    fn json_object_puts_msg_first() {
        let payload = r#"{"from":"10690000","msg":" 验证码 4821 ","ts":1717000000,"extra":null,"meta":{"sim":1}}"#;
        let content = MessageContent::parse("sms/inbox", payload);
        assert_eq!(
            content.body,
            "验证码 4821\nfrom: 10690000\nts: 1717000000\nmeta: {\"sim\":1}"
        );
        assert_eq!(
            content.snippets,
            vec![
                "验证码 4821".to_string(),
                "10690000".to_string(),
                "{\"sim\":1}".to_string(),
                content.body.clone(),
            ]
        );
    }

    #[test]
    fn json_object_without_strings_uses_raw_text() {
        let content = MessageContent::parse("t", r#"{"count":3}"#);
        assert_eq!(content.body, "count: 3");
        assert_eq!(content.snippets, vec![r#"{"count":3}"#, "count: 3"]);
    }

    #[test]
    fn json_array_is_pretty_printed() {
        let content = MessageContent::parse("t", "[1,2]");
        assert_eq!(content.body, "[\n  1,\n  2\n]");
    }

    #[test]
    fn hex_payloads_produce_no_snippets() {
        let decoded = PayloadDecoder::default().decode(RawPublish::new("sms/inbox", vec![0xff]));
        let content = MessageContent::from_message(&decoded.message);
        assert_eq!(content.body, "ff");
        assert!(content.snippets.is_empty());
    }
}
