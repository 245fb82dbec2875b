//! Message transform rules applied to frames crossing the relay.
//!
//! Rules are total: any event without a rule is forwarded byte-for-byte.

use super::protocol::{ITEM_FUNCTION_CALL, event, event_type};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use tracing::warn;

/// What to do with a frame after the rules have seen it.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewrite {
    /// Forward the original text untouched.
    Forward,
    /// Forward this text instead.
    Replace(String),
    /// Do not forward anything.
    Drop,
}

/// Session parameters the server controls regardless of what the client asks for.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub instructions: String,
    pub voice: String,
    pub temperature: Option<f64>,
    pub max_response_output_tokens: Option<u32>,
    pub turn_detection: Option<Value>,
    pub input_audio_format: Option<String>,
    pub output_audio_format: Option<String>,
}

pub struct TransformRules {
    session: SessionSettings,
    tools: Vec<Value>,
    suppressed: HashSet<String>,
}

impl TransformRules {
    /// `tools` is the function-tool array advertised in every session update.
    pub fn new(session: SessionSettings, tools: Vec<Value>) -> Self {
        Self {
            session,
            tools,
            suppressed: HashSet::from([event::RATE_LIMITS_UPDATED.to_string()]),
        }
    }

    /// Replaces the set of upstream event types hidden from clients.
    pub fn with_suppressed<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suppressed = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn session(&self) -> &SessionSettings {
        &self.session
    }

    fn tool_choice(&self) -> &'static str {
        if self.tools.is_empty() { "none" } else { "auto" }
    }

    /// Rules for a text frame travelling from the client to the upstream service.
    pub fn client_to_upstream(&self, text: &str) -> Rewrite {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Client frame is not JSON; forwarding unchanged");
                return Rewrite::Forward;
            }
        };
        match event_type(&message) {
            Some(event::SESSION_UPDATE) => {
                Rewrite::Replace(self.enforce_session_update(message).to_string())
            }
            _ => Rewrite::Forward,
        }
    }

    /// Rules for an already parsed event travelling from upstream to the client.
    pub fn upstream_to_client(&self, message: &Value) -> Rewrite {
        let Some(kind) = event_type(message) else {
            return Rewrite::Forward;
        };
        if self.suppressed.contains(kind) {
            return Rewrite::Drop;
        }
        match kind {
            event::SESSION_CREATED | event::SESSION_UPDATED => {
                let mut message = message.clone();
                match message.get_mut("session").and_then(Value::as_object_mut) {
                    Some(session) => {
                        self.hide_server_session(session);
                        Rewrite::Replace(message.to_string())
                    }
                    None => Rewrite::Forward,
                }
            }
            event::RESPONSE_DONE => strip_function_calls(message),
            _ => Rewrite::Forward,
        }
    }

    /// Overwrites the server-controlled fields of a `session.update`. A
    /// missing or malformed `session` is rebuilt from the overrides alone.
    fn enforce_session_update(&self, mut message: Value) -> Value {
        let Some(object) = message.as_object_mut() else {
            return message;
        };
        let session = object
            .entry("session")
            .or_insert_with(|| Value::Object(Map::new()));
        if !session.is_object() {
            warn!("session.update carried a non-object session; replacing it");
            *session = Value::Object(Map::new());
        }
        if let Value::Object(session) = session {
            self.apply_overrides(session);
        }
        message
    }

    fn apply_overrides(&self, session: &mut Map<String, Value>) {
        let s = &self.session;
        session.insert("instructions".into(), json!(s.instructions));
        session.insert("voice".into(), json!(s.voice));
        session.insert("tools".into(), Value::Array(self.tools.clone()));
        session.insert("tool_choice".into(), json!(self.tool_choice()));
        if let Some(temperature) = s.temperature {
            session.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = s.max_response_output_tokens {
            session.insert("max_response_output_tokens".into(), json!(max_tokens));
        }
        if let Some(turn_detection) = &s.turn_detection {
            session.insert("turn_detection".into(), turn_detection.clone());
        }
        if let Some(format) = &s.input_audio_format {
            session.insert("input_audio_format".into(), json!(format));
        }
        if let Some(format) = &s.output_audio_format {
            session.insert("output_audio_format".into(), json!(format));
        }
    }

    /// Clients never learn the system prompt or the tool definitions.
    fn hide_server_session(&self, session: &mut Map<String, Value>) {
        session.insert("instructions".into(), json!(""));
        session.insert("tools".into(), json!([]));
        session.insert("voice".into(), json!(self.session.voice));
        session.insert("tool_choice".into(), json!("none"));
        session.insert("max_response_output_tokens".into(), Value::Null);
    }
}

/// Removes function-call entries from a `response.done` output list.
fn strip_function_calls(message: &Value) -> Rewrite {
    let is_call = |item: &Value| item.get("type").and_then(Value::as_str) == Some(ITEM_FUNCTION_CALL);
    let has_calls = message
        .pointer("/response/output")
        .and_then(Value::as_array)
        .is_some_and(|output| output.iter().any(is_call));
    if !has_calls {
        return Rewrite::Forward;
    }

    let mut message = message.clone();
    if let Some(output) = message
        .pointer_mut("/response/output")
        .and_then(Value::as_array_mut)
    {
        output.retain(|item| !is_call(item));
    }
    Rewrite::Replace(message.to_string())
}
