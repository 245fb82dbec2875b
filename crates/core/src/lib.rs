//! VoiceRAG core: the tool contract shared by the realtime relay and the
//! tools it can call on the model's behalf.

pub mod auth;
pub mod forms;
pub mod rag;
pub mod registry;
pub mod tool;

pub use registry::{ToolError, ToolRegistry};
pub use tool::{Tool, ToolArgs, ToolHandler, ToolResult, ToolResultDirection, ToolSchema};
