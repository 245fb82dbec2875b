//! Realtime protocol vocabulary used by the relay.
//!
//! Only the event types the relay rewrites or intercepts are named here;
//! everything else is forwarded without being interpreted.

use anyhow::Result;
use async_openai::types::realtime::{
    ClientEvent, ConversationItemCreateEvent, Item, ItemType, ResponseCreateEvent,
};
use serde_json::{Value, json};

pub mod event {
    pub const SESSION_UPDATE: &str = "session.update";
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_UPDATED: &str = "session.updated";
    pub const CONVERSATION_ITEM_CREATED: &str = "conversation.item.created";
    pub const OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
    pub const OUTPUT_ITEM_DONE: &str = "response.output_item.done";
    pub const FUNCTION_CALL_ARGUMENTS_DELTA: &str = "response.function_call_arguments.delta";
    pub const FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
    pub const RESPONSE_CREATED: &str = "response.created";
    pub const RESPONSE_DONE: &str = "response.done";
    pub const RATE_LIMITS_UPDATED: &str = "rate_limits.updated";
    /// Client-directed tool output; not part of the upstream vocabulary.
    pub const MIDDLE_TIER_TOOL_RESPONSE: &str = "extension.middle_tier_tool_response";
}

pub const ITEM_FUNCTION_CALL: &str = "function_call";
pub const ITEM_FUNCTION_CALL_OUTPUT: &str = "function_call_output";

/// The `type` discriminator of a realtime event, if it has one.
pub fn event_type(event: &Value) -> Option<&str> {
    event.get("type").and_then(Value::as_str)
}

/// Builds the `conversation.item.create` event that hands a tool's output back
/// to the model for the given call.
pub fn function_call_output(call_id: &str, output: &str) -> Result<String> {
    let item = Item {
        r#type: Some(ItemType::FunctionCallOutput),
        call_id: Some(call_id.to_string()),
        output: Some(output.to_string()),
        id: None,
        status: None,
        role: None,
        content: None,
        name: None,
        arguments: None,
    };
    let event = ClientEvent::ConversationItemCreate(ConversationItemCreateEvent {
        item,
        event_id: None,
        previous_item_id: None,
    });
    Ok(serde_json::to_string(&event)?)
}

/// Builds the `response.create` trigger asking the model to continue.
pub fn response_create() -> Result<String> {
    let event = ClientEvent::ResponseCreate(ResponseCreateEvent {
        response: None,
        event_id: None,
    });
    Ok(serde_json::to_string(&event)?)
}

/// Builds the client-only event carrying a tool result the model never sees.
pub fn middle_tier_tool_response(
    previous_item_id: Option<&str>,
    tool_name: &str,
    tool_result: &str,
) -> String {
    json!({
        "type": event::MIDDLE_TIER_TOOL_RESPONSE,
        "previous_item_id": previous_item_id,
        "tool_name": tool_name,
        "tool_result": tool_result,
    })
    .to_string()
}
