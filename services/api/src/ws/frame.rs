//! Transport-neutral WebSocket frames.
//!
//! The downstream leg speaks axum's WebSocket type and the upstream leg
//! speaks tungstenite's; the relay itself only ever sees [`Frame`]s.

use axum::extract::ws::Message as ClientMessage;
use bytes::Bytes;
use tokio_tungstenite::tungstenite::protocol::Message as UpstreamMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close,
}

impl Frame {
    /// Control frames other than close are answered by the transport and
    /// never reach the relay.
    pub fn from_client(message: ClientMessage) -> Option<Self> {
        match message {
            ClientMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            ClientMessage::Binary(data) => Some(Frame::Binary(data)),
            ClientMessage::Close(_) => Some(Frame::Close),
            ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
        }
    }

    pub fn into_client(self) -> ClientMessage {
        match self {
            Frame::Text(text) => ClientMessage::Text(text.into()),
            Frame::Binary(data) => ClientMessage::Binary(data),
            Frame::Close => ClientMessage::Close(None),
        }
    }

    pub fn from_upstream(message: UpstreamMessage) -> Option<Self> {
        match message {
            UpstreamMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            UpstreamMessage::Binary(data) => Some(Frame::Binary(data)),
            UpstreamMessage::Close(_) => Some(Frame::Close),
            _ => None,
        }
    }

    pub fn into_upstream(self) -> UpstreamMessage {
        match self {
            Frame::Text(text) => UpstreamMessage::Text(text.into()),
            Frame::Binary(data) => UpstreamMessage::Binary(data),
            Frame::Close => UpstreamMessage::Close(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_text_roundtrip() {
        let frame = Frame::from_client(ClientMessage::Text("{\"type\":\"x\"}".into())).unwrap();
        assert_eq!(frame, Frame::Text("{\"type\":\"x\"}".to_string()));
        assert!(matches!(frame.into_upstream(), UpstreamMessage::Text(t) if t.as_str() == "{\"type\":\"x\"}"));
    }

    #[test]
    fn test_pings_are_not_relayed() {
        assert_eq!(Frame::from_client(ClientMessage::Ping(Bytes::new())), None);
        assert_eq!(Frame::from_upstream(UpstreamMessage::Pong(Bytes::new())), None);
    }

    #[test]
    fn test_close_maps_both_ways() {
        assert_eq!(Frame::from_upstream(UpstreamMessage::Close(None)), Some(Frame::Close));
        assert!(matches!(Frame::Close.into_client(), ClientMessage::Close(None)));
    }
}
