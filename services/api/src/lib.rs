//! VoiceRAG API Library Crate
//!
//! Configuration, persistence, routing and the realtime relay for the voice
//! assistant service. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod router;
pub mod state;
pub mod ws;
