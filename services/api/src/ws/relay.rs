//! The per-connection relay between a client and the realtime service.
//!
//! Two pumps run for the life of a session. The client pump applies the
//! outbound rules and forwards. The upstream pump classifies every event,
//! tracks tool calls by call id and runs the requested tools on a `JoinSet`
//! so that slow tools never hold back unrelated events.

use super::{
    frame::Frame,
    protocol::{
        ITEM_FUNCTION_CALL, ITEM_FUNCTION_CALL_OUTPUT, event, event_type, function_call_output,
        middle_tier_tool_response, response_create,
    },
    transform::{Rewrite, TransformRules},
};
use anyhow::{Context, Result};
use futures::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{Instrument, debug, error, info, warn};
use voicerag_core::{ToolArgs, ToolError, ToolHandler, ToolRegistry, ToolResult, ToolResultDirection};

/// Which side of the session ended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Upstream,
}

pub struct Relay {
    rules: Arc<TransformRules>,
    tools: Arc<ToolRegistry>,
    tool_timeout: Duration,
}

/// A function call the model has started but not yet completed.
#[derive(Debug, Default)]
struct PendingToolCall {
    name: String,
    previous_item_id: Option<String>,
    arguments: String,
}

/// A finished tool invocation waiting to be delivered.
struct CompletedCall {
    call_id: String,
    name: String,
    previous_item_id: Option<String>,
    result: ToolResult,
}

/// Tool-call bookkeeping for one session. Owned by the upstream pump.
#[derive(Default)]
struct CallState {
    pending: HashMap<String, PendingToolCall>,
    resolved: HashSet<String>,
    response_active: bool,
    needs_continue: bool,
}

impl CallState {
    fn start_call(&mut self, message: &Value) {
        let Some(item) = message.get("item") else {
            return;
        };
        let Some(call_id) = str_field(item, "call_id") else {
            warn!("function_call item without a call_id");
            return;
        };
        if self.resolved.contains(call_id) {
            return;
        }
        let call = self.pending.entry(call_id.to_string()).or_default();
        if let Some(name) = str_field(item, "name") {
            call.name = name.to_string();
        }
        if let Some(previous) = str_field(message, "previous_item_id") {
            call.previous_item_id = Some(previous.to_string());
        }
        debug!(call_id, "Tool call started");
    }

    fn append_arguments(&mut self, message: &Value) {
        let (Some(call_id), Some(delta)) = (str_field(message, "call_id"), str_field(message, "delta"))
        else {
            warn!("Argument delta without call_id or delta");
            return;
        };
        if self.resolved.contains(call_id) {
            return;
        }
        self.pending
            .entry(call_id.to_string())
            .or_default()
            .arguments
            .push_str(delta);
    }

    fn finish_arguments(&mut self, message: &Value) {
        let Some(call_id) = str_field(message, "call_id") else {
            warn!("Argument completion without call_id");
            return;
        };
        if self.resolved.contains(call_id) {
            return;
        }
        let call = self.pending.entry(call_id.to_string()).or_default();
        if let Some(arguments) = str_field(message, "arguments") {
            call.arguments = arguments.to_string();
        }
        if let Some(name) = str_field(message, "name") {
            call.name = name.to_string();
        }
    }

    /// Closes the current response. Calls it never completed are abandoned and
    /// resolved ids are forgotten; call ids are only unique within a response.
    fn end_response(&mut self) {
        self.response_active = false;
        if !self.pending.is_empty() {
            debug!(abandoned = self.pending.len(), "Dropping calls the response never completed");
            self.pending.clear();
        }
        self.resolved.clear();
    }

    /// Resolves a completed call exactly once, merging what the streamed
    /// events collected with what the completion item carries.
    fn complete_call(&mut self, item: &Value) -> Option<(String, PendingToolCall)> {
        let Some(call_id) = str_field(item, "call_id") else {
            warn!("Completed function_call without a call_id");
            return None;
        };
        if !self.resolved.insert(call_id.to_string()) {
            debug!(call_id, "Ignoring duplicate tool call completion");
            return None;
        }
        let mut call = self.pending.remove(call_id).unwrap_or_default();
        if let Some(name) = str_field(item, "name") {
            call.name = name.to_string();
        }
        if let Some(arguments) = str_field(item, "arguments").filter(|a| !a.is_empty()) {
            call.arguments = arguments.to_string();
        }
        Some((call_id.to_string(), call))
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn carries_item(message: &Value, item_type: &str) -> bool {
    message
        .get("item")
        .and_then(|item| str_field(item, "type"))
        .is_some_and(|t| t == item_type)
}

/// An empty argument string means the tool takes no arguments.
fn parse_arguments(raw: &str) -> Result<ToolArgs, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(ToolArgs::new());
    }
    serde_json::from_str(raw)
}

/// Runs one tool call to completion. Every failure becomes an error result
/// with a generic message; details only go to the log.
async fn invoke(
    handler: Result<Arc<dyn ToolHandler>, ToolError>,
    name: &str,
    arguments: &str,
    timeout: Duration,
) -> ToolResult {
    let handler = match handler {
        Ok(handler) => handler,
        Err(e) => {
            warn!(tool = name, "Model requested a tool that is not registered");
            return ToolResult::error(&e.to_string());
        }
    };
    let args = match parse_arguments(arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!(tool = name, error = %e, "Tool arguments are not a JSON object");
            return ToolResult::error("The tool arguments could not be understood.");
        }
    };

    let call = AssertUnwindSafe(handler.call(args)).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(result))) => result,
        Ok(Ok(Err(e))) => {
            error!(tool = name, error = ?e, "Tool handler failed");
            ToolResult::error("The tool failed to produce a result.")
        }
        Ok(Err(_)) => {
            error!(tool = name, "Tool handler panicked");
            ToolResult::error("The tool failed to produce a result.")
        }
        Err(_) => {
            warn!(tool = name, timeout_secs = timeout.as_secs_f64(), "Tool handler timed out");
            ToolResult::error("The tool took too long to respond.")
        }
    }
}

impl Relay {
    pub fn new(rules: Arc<TransformRules>, tools: Arc<ToolRegistry>, tool_timeout: Duration) -> Self {
        Self {
            rules,
            tools,
            tool_timeout,
        }
    }

    /// Pumps both directions until either side stops, then returns which one
    /// did. The other pump and every in-flight tool task are dropped with it.
    pub async fn run<C, U>(
        &self,
        client_in: C,
        upstream_in: U,
        to_client: mpsc::Sender<Frame>,
        to_upstream: mpsc::Sender<Frame>,
    ) -> Leg
    where
        C: Stream<Item = Frame> + Unpin + Send,
        U: Stream<Item = Frame> + Unpin + Send,
    {
        let client = self.pump_client(client_in, to_upstream.clone());
        let upstream = self.pump_upstream(upstream_in, to_client, to_upstream);
        tokio::select! {
            result = client => {
                if let Err(e) = result {
                    warn!(error = ?e, "Client pump stopped");
                }
                Leg::Client
            }
            result = upstream => {
                if let Err(e) = result {
                    warn!(error = ?e, "Upstream pump stopped");
                }
                Leg::Upstream
            }
        }
    }

    async fn pump_client<C>(&self, mut client_in: C, to_upstream: mpsc::Sender<Frame>) -> Result<()>
    where
        C: Stream<Item = Frame> + Unpin,
    {
        while let Some(frame) = client_in.next().await {
            let frame = match frame {
                Frame::Text(text) => match self.rules.client_to_upstream(&text) {
                    Rewrite::Forward => Frame::Text(text),
                    Rewrite::Replace(text) => Frame::Text(text),
                    Rewrite::Drop => continue,
                },
                // The realtime protocol is JSON text. Binary frames are only
                // forwarded after the same rewrite, never raw.
                Frame::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => match self.rules.client_to_upstream(text) {
                        Rewrite::Forward => Frame::Text(text.to_string()),
                        Rewrite::Replace(text) => Frame::Text(text),
                        Rewrite::Drop => continue,
                    },
                    Err(_) => {
                        warn!(len = data.len(), "Dropping non-UTF-8 binary frame from client");
                        continue;
                    }
                },
                Frame::Close => break,
            };
            to_upstream
                .send(frame)
                .await
                .context("Upstream writer has stopped")?;
        }
        info!("Client closed the connection");
        Ok(())
    }

    async fn pump_upstream<U>(
        &self,
        mut upstream_in: U,
        to_client: mpsc::Sender<Frame>,
        to_upstream: mpsc::Sender<Frame>,
    ) -> Result<()>
    where
        U: Stream<Item = Frame> + Unpin,
    {
        let mut state = CallState::default();
        let mut tasks: JoinSet<CompletedCall> = JoinSet::new();

        loop {
            tokio::select! {
                frame = upstream_in.next() => match frame {
                    Some(Frame::Text(text)) => {
                        self.on_upstream_text(text, &mut state, &mut tasks, &to_client, &to_upstream)
                            .await?;
                    }
                    Some(Frame::Binary(data)) => {
                        to_client
                            .send(Frame::Binary(data))
                            .await
                            .context("Client writer has stopped")?;
                    }
                    Some(Frame::Close) | None => {
                        info!(in_flight = tasks.len(), "Upstream closed the connection");
                        return Ok(());
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(done) => self.deliver(done, &mut state, &to_client, &to_upstream).await?,
                        Err(e) => error!(error = %e, "Tool task did not finish"),
                    }
                    maybe_continue(&mut state, tasks.len(), &to_upstream).await?;
                }
            }
        }
    }

    async fn on_upstream_text(
        &self,
        text: String,
        state: &mut CallState,
        tasks: &mut JoinSet<CompletedCall>,
        to_client: &mpsc::Sender<Frame>,
        to_upstream: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let message: Value = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Upstream frame is not JSON; forwarding unchanged");
                to_client
                    .send(Frame::Text(text))
                    .await
                    .context("Client writer has stopped")?;
                return Ok(());
            }
        };

        let kind = event_type(&message).unwrap_or_default();
        match kind {
            event::OUTPUT_ITEM_ADDED | event::CONVERSATION_ITEM_CREATED
                if carries_item(&message, ITEM_FUNCTION_CALL) =>
            {
                state.start_call(&message);
                return Ok(());
            }
            // Echo of an output this relay injected.
            event::CONVERSATION_ITEM_CREATED if carries_item(&message, ITEM_FUNCTION_CALL_OUTPUT) => {
                return Ok(());
            }
            event::FUNCTION_CALL_ARGUMENTS_DELTA => {
                state.append_arguments(&message);
                return Ok(());
            }
            event::FUNCTION_CALL_ARGUMENTS_DONE => {
                state.finish_arguments(&message);
                return Ok(());
            }
            event::OUTPUT_ITEM_DONE if carries_item(&message, ITEM_FUNCTION_CALL) => {
                if let Some(item) = message.get("item") {
                    self.spawn_tool(item, state, tasks);
                }
                return Ok(());
            }
            event::RESPONSE_CREATED => state.response_active = true,
            event::RESPONSE_DONE => state.end_response(),
            _ => {}
        }

        match self.rules.upstream_to_client(&message) {
            Rewrite::Forward => to_client.send(Frame::Text(text)).await,
            Rewrite::Replace(text) => to_client.send(Frame::Text(text)).await,
            Rewrite::Drop => {
                debug!(event = kind, "Suppressed upstream event");
                Ok(())
            }
        }
        .context("Client writer has stopped")?;

        if kind == event::RESPONSE_DONE {
            maybe_continue(state, tasks.len(), to_upstream).await?;
        }
        Ok(())
    }

    fn spawn_tool(&self, item: &Value, state: &mut CallState, tasks: &mut JoinSet<CompletedCall>) {
        let Some((call_id, call)) = state.complete_call(item) else {
            return;
        };
        let PendingToolCall {
            name,
            previous_item_id,
            arguments,
        } = call;
        info!(%call_id, tool = %name, "Invoking tool");

        let handler = self.tools.lookup(&name).map(|tool| tool.handler.clone());
        let timeout = self.tool_timeout;
        tasks.spawn(
            async move {
                let started = Instant::now();
                let result = invoke(handler, &name, &arguments, timeout).await;
                debug!(tool = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Tool finished");
                CompletedCall {
                    call_id,
                    name,
                    previous_item_id,
                    result,
                }
            }
            .in_current_span(),
        );
    }

    /// Hands a finished tool result to its destination. The model's function
    /// call is always closed upstream; a client-directed payload is only ever
    /// sent to the client.
    async fn deliver(
        &self,
        done: CompletedCall,
        state: &mut CallState,
        to_client: &mpsc::Sender<Frame>,
        to_upstream: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let CompletedCall {
            call_id,
            name,
            previous_item_id,
            result,
        } = done;

        match result.destination {
            ToolResultDirection::ToServer => {
                to_upstream
                    .send(Frame::Text(function_call_output(&call_id, &result.text)?))
                    .await
                    .context("Upstream writer has stopped")?;
            }
            ToolResultDirection::ToClient => {
                to_upstream
                    .send(Frame::Text(function_call_output(&call_id, "")?))
                    .await
                    .context("Upstream writer has stopped")?;
                let event = middle_tier_tool_response(previous_item_id.as_deref(), &name, &result.text);
                to_client
                    .send(Frame::Text(event))
                    .await
                    .context("Client writer has stopped")?;
            }
        }
        info!(%call_id, tool = %name, destination = ?result.destination, "Tool result delivered");
        state.needs_continue = true;
        Ok(())
    }
}

/// Sends one `response.create` once every tool of the turn has delivered
/// and the model's response for that turn is finished.
async fn maybe_continue(
    state: &mut CallState,
    in_flight: usize,
    to_upstream: &mpsc::Sender<Frame>,
) -> Result<()> {
    if !state.needs_continue || in_flight > 0 || state.response_active {
        return Ok(());
    }
    state.needs_continue = false;
    debug!("Asking the model to continue with tool output");
    to_upstream
        .send(Frame::Text(response_create()?))
        .await
        .context("Upstream writer has stopped")
}
