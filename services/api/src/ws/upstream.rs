//! Opens the upstream realtime connection for one session.

use crate::config::RealtimeConfig;
use anyhow::{Context, Result, anyhow};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::client::IntoClientRequest,
};
use tracing::info;
use url::Url;

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Correlation header copied from the client's upgrade request.
pub const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// `wss://{endpoint}/openai/realtime?api-version=..&deployment=..`
pub fn realtime_url(config: &RealtimeConfig) -> Result<Url> {
    let mut url = Url::parse(&config.endpoint)
        .with_context(|| format!("Invalid realtime endpoint '{}'", config.endpoint))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(anyhow!("Unsupported realtime endpoint scheme '{}'", other)),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("Cannot use scheme '{}' for the realtime endpoint", scheme))?;
    url.set_path("/openai/realtime");
    url.query_pairs_mut()
        .clear()
        .append_pair("api-version", &config.api_version)
        .append_pair("deployment", &config.deployment);
    Ok(url)
}

pub async fn connect(config: &RealtimeConfig, client_request_id: Option<&str>) -> Result<UpstreamSocket> {
    let url = realtime_url(config)?;
    let mut request = url.as_str().into_client_request()?;

    let (name, value) = config.credential.header();
    request.headers_mut().insert(name, value.parse()?);
    if let Some(id) = client_request_id {
        request.headers_mut().insert(CLIENT_REQUEST_ID, id.parse()?);
    }

    let (socket, _) = connect_async(request)
        .await
        .with_context(|| format!("Failed to connect to realtime endpoint {}", url.host_str().unwrap_or_default()))?;
    info!(deployment = %config.deployment, "Connected to upstream realtime service.");
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicerag_core::auth::Credential;

    fn config(endpoint: &str) -> RealtimeConfig {
        RealtimeConfig {
            endpoint: endpoint.to_string(),
            deployment: "gpt-4o-realtime-preview".to_string(),
            api_version: "2024-10-01-preview".to_string(),
            credential: Credential::api_key("key"),
            voice: "alloy".to_string(),
            temperature: None,
            max_response_output_tokens: None,
            turn_detection: None,
            input_audio_format: None,
            output_audio_format: None,
        }
    }

    #[test]
    fn test_realtime_url_from_https_endpoint() {
        let url = realtime_url(&config("https://raleigh.openai.azure.com/")).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://raleigh.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_realtime_url_from_plain_http_endpoint() {
        let url = realtime_url(&config("http://localhost:9000")).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(9000));
        assert_eq!(url.path(), "/openai/realtime");
    }

    #[test]
    fn test_realtime_url_rejects_bad_endpoints() {
        assert!(realtime_url(&config("not a url")).is_err());
        assert!(realtime_url(&config("ftp://example.com")).is_err());
    }

    #[tokio::test]
    async fn test_connect_fails_for_unreachable_endpoint() {
        let result = connect(&config("http://127.0.0.1:1"), Some("req-1")).await;
        assert!(result.is_err());
    }
}
