use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const END_OF_CALL_KINDS: &[&str] = &["end-of-call-report", "call-ended", "call.ended"];
pub const TOOL_CALLS_KIND: &str = "tool-calls";

#[derive(PartialEq, Eq, Debug)]
pub enum EventKind {
    EndOfCall,
    ToolCalls,
    Other(String),
}

/// Newer producers wrap the event as `{"message": {...}}`; older ones post it bare.
pub fn unwrap_envelope(body: &Value) -> &Value {
    match body.get("message") {
        Some(inner @ Value::Object(_)) => inner,
        _ => body,
    }
}

pub fn event_kind(event: &Value) -> EventKind {
    let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();
    if END_OF_CALL_KINDS.contains(&kind) {
        EventKind::EndOfCall
    } else if kind == TOOL_CALLS_KIND {
        EventKind::ToolCalls
    } else {
        EventKind::Other(kind.to_string())
    }
}

/// Call identifier of an (unwrapped) event, if the producer sent one.
pub fn call_id(event: &Value) -> Option<String> {
    [
        event.pointer("/call/id"),
        event.get("callId"),
        event.get("call_id"),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Deserialize, Default, Debug)]
pub struct CallMeta {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Deserialize, Default, Debug)]
pub struct ToolFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolFunction {
    /// Arguments arrive either as an object or as a JSON-encoded string of one.
    pub fn argument_map(&self) -> Map<String, Value> {
        match &self.arguments {
            Value::Object(map) => map.clone(),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}

#[derive(Deserialize, Default, Debug)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub function: ToolFunction,
}

#[derive(Deserialize, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub call: CallMeta,
    #[serde(default, alias = "toolCalls")]
    pub tool_call_list: Vec<ToolCall>,
}

impl ToolCallMessage {
    /// Never fails; anything unreadable becomes an empty message.  A bare
    /// `{"toolCallId", "callId", "arguments"}` body is read as a single tool call.
    pub fn from_body(body: &Value) -> Self {
        let event = unwrap_envelope(body);
        let mut message: Self = serde_json::from_value(event.clone()).unwrap_or_default();
        if message.call.id.is_none() {
            message.call.id = call_id(event);
        }
        if message.tool_call_list.is_empty() {
            if let Some(id) = event.get("toolCallId").and_then(Value::as_str) {
                message.tool_call_list.push(ToolCall {
                    id: id.to_string(),
                    function: ToolFunction {
                        name: event
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments: event.get("arguments").cloned().unwrap_or(Value::Null),
                    },
                });
            }
        }
        message
    }
}

#[derive(Serialize, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub result: String,
}

#[derive(Serialize, Debug)]
pub struct ToolCallResponse {
    pub results: Vec<ToolCallResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrapped_and_bare_events_classify_alike() {
        let wrapped = json!({"message": {"type": "end-of-call-report", "call": {"id": "c1"}}});
        let bare = json!({"type": "call.ended", "callId": "c1"});
        for body in [&wrapped, &bare] {
            let event = unwrap_envelope(body);
            assert_eq!(event_kind(event), EventKind::EndOfCall);
            assert_eq!(call_id(event).as_deref(), Some("c1"));
        }
        assert_eq!(
            event_kind(&json!({"type": "status-update"})),
            EventKind::Other("status-update".into())
        );
        assert_eq!(event_kind(&json!({})), EventKind::Other(String::new()));
    }

    #[test]
    fn tool_call_arguments_accept_strings_and_objects() {
        let body = json!({"message": {
            "type": "tool-calls",
            "call": {"id": "abc"},
            "toolCalls": [
                {"id": "t1", "function": {"name": "book_appointment",
                    "arguments": "{\"datetime\": \"2025-03-01T14:00:00Z\"}"}},
                {"id": "t2", "function": {"name": "cancel_appointment",
                    "arguments": {"reason": "changed mind"}}}
            ]
        }});
        let message = ToolCallMessage::from_body(&body);
        assert_eq!(message.call.id.as_deref(), Some("abc"));
        assert_eq!(message.tool_call_list.len(), 2);
        assert_eq!(
            message.tool_call_list[0].function.argument_map()["datetime"],
            "2025-03-01T14:00:00Z"
        );
        assert_eq!(
            message.tool_call_list[1].function.argument_map()["reason"],
            "changed mind"
        );
    }

    #[test]
    fn bare_tool_call_body_is_one_call() {
        let body = json!({
            "toolCallId": "t9",
            "callId": "abc",
            "arguments": {"datetime": "2025-03-01T14:00:00Z"}
        });
        let message = ToolCallMessage::from_body(&body);
        assert_eq!(message.call.id.as_deref(), Some("abc"));
        assert_eq!(message.tool_call_list.len(), 1);
        assert_eq!(message.tool_call_list[0].id, "t9");
        assert_eq!(message.tool_call_list[0].function.name, "");
    }

    #[test]
    fn garbage_tool_message_is_empty_not_an_error() {
        let message = ToolCallMessage::from_body(&json!({"toolCallList": "nope"}));
        assert!(message.tool_call_list.is_empty());
    }

    #[test]
    fn results_serialize_with_camel_case_ids() {
        let response = ToolCallResponse {
            results: vec![ToolCallResult {
                tool_call_id: "t1".into(),
                result: "ok".into(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"results": [{"toolCallId": "t1", "result": "ok"}]})
        );
    }
}
