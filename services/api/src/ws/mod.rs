//! Realtime WebSocket Relay
//!
//! - `frame`: transport-neutral frames shared by both legs.
//! - `protocol`: the realtime event names and the events the relay synthesizes.
//! - `transform`: rewrite rules applied to frames in each direction.
//! - `relay`: the per-session pumps and tool-call state machine.
//! - `upstream`: opening the connection to the realtime service.
//! - `session`: pairing both legs and tearing them down together.

pub mod frame;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transform;
pub mod upstream;

pub use session::ws_handler;
