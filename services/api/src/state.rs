//! Shared Application State
//!
//! Everything here is built once at startup and only read afterwards, so a
//! session clones the `Arc`s it needs and never takes a lock.

use crate::{
    config::Config,
    ws::transform::{SessionSettings, TransformRules},
};
use std::sync::Arc;
use voicerag_core::ToolRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
    pub rules: Arc<TransformRules>,
}

impl AppState {
    /// Freezes the registry and derives the session rules every connection uses.
    pub fn new(config: Config, tools: ToolRegistry, system_message: String) -> Self {
        let realtime = &config.realtime;
        let session = SessionSettings {
            instructions: system_message,
            voice: realtime.voice.clone(),
            temperature: realtime.temperature,
            max_response_output_tokens: realtime.max_response_output_tokens,
            turn_detection: realtime.turn_detection.clone(),
            input_audio_format: realtime.input_audio_format.clone(),
            output_audio_format: realtime.output_audio_format.clone(),
        };
        let rules = TransformRules::new(session, tools.schemas());
        Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
            rules: Arc::new(rules),
        }
    }
}
