//! Outbound request credentials.
//!
//! Acquiring or refreshing tokens happens elsewhere; this module only knows how
//! to attach an already-obtained secret to a request.

use secrecy::{ExposeSecret, SecretString};

#[derive(Clone)]
pub enum Credential {
    /// Sent as the `api-key` header.
    ApiKey(SecretString),
    /// Sent as `Authorization: Bearer <token>`.
    Bearer(SecretString),
}

impl Credential {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(SecretString::from(key.into()))
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(SecretString::from(token.into()))
    }

    /// Header name and value carrying this credential.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Credential::ApiKey(key) => ("api-key", key.expose_secret().to_string()),
            Credential::Bearer(token) => (
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            ),
        }
    }

    /// Attaches the credential to a `reqwest` request.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let (name, value) = self.header();
        request.header(name, value)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("Credential::ApiKey([REDACTED])"),
            Credential::Bearer(_) => f.write_str("Credential::Bearer([REDACTED])"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_header() {
        let (name, value) = Credential::api_key("secret-key").header();
        assert_eq!(name, "api-key");
        assert_eq!(value, "secret-key");
    }

    #[test]
    fn test_bearer_header() {
        let (name, value) = Credential::bearer("tok").header();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer tok");
    }

    #[test]
    fn test_debug_never_prints_secret() {
        let rendered = format!("{:?}", Credential::api_key("super-secret"));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
