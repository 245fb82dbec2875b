//! Retrieval tools backed by an Azure AI Search index.
//!
//! `search` feeds knowledge-base passages back to the model; `report_grounding`
//! resolves the cited passages and hands them to the browser client for display.

use crate::{
    auth::Credential,
    registry::{ToolError, ToolRegistry},
    tool::{ToolArgs, ToolHandler, ToolResult, ToolSchema},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;

const SEARCH_API_VERSION: &str = "2024-07-01";
const SEARCH_TOP: usize = 5;
const VECTOR_NEAREST_NEIGHBORS: usize = 50;

/// A single search hit, keyed by index field name.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Simple,
    Semantic,
    Full,
}

/// A vectorizable text query; the index computes the embedding server-side.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VectorQuery {
    pub kind: &'static str,
    pub text: String,
    pub k: usize,
    pub fields: String,
}

/// Body of a `docs/search` request.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub search: String,
    pub query_type: QueryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_configuration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vector_queries: Vec<VectorQuery>,
    pub select: String,
    pub top: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<Document>>;
}

/// Index field names and query options shared by both retrieval tools.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub semantic_configuration: Option<String>,
    pub identifier_field: String,
    pub content_field: String,
    pub embedding_field: String,
    pub title_field: String,
    pub use_vector_query: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            semantic_configuration: None,
            identifier_field: "chunk_id".to_string(),
            content_field: "chunk".to_string(),
            embedding_field: "text_vector".to_string(),
            title_field: "title".to_string(),
            use_vector_query: true,
        }
    }
}

/// REST client for the Azure AI Search documents API.
pub struct AzureSearchClient {
    http: reqwest::Client,
    endpoint: String,
    index: String,
    credential: Credential,
}

impl AzureSearchClient {
    pub fn new(endpoint: &str, index: &str, credential: Credential) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("voicerag-relay")
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index: index.to_string(),
            credential,
        })
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Document>,
}

#[async_trait]
impl SearchBackend for AzureSearchClient {
    async fn search(&self, request: SearchRequest) -> Result<Vec<Document>> {
        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, self.index, SEARCH_API_VERSION
        );
        let response = self
            .credential
            .apply(self.http.post(&url))
            .json(&request)
            .send()
            .await
            .context("Search request failed")?
            .error_for_status()
            .context("Search service returned an error status")?;
        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to decode search response")?;
        Ok(body.value)
    }
}

fn field_text(doc: &Document, field: &str) -> String {
    match doc.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: ToolArgs) -> Result<T> {
    serde_json::from_value(Value::Object(args)).context("Invalid tool arguments")
}

/// Arguments of the `search` tool.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchArgs {
    /// Search query
    pub query: String,
}

pub struct SearchTool {
    backend: Arc<dyn SearchBackend>,
    settings: Arc<SearchSettings>,
}

impl SearchTool {
    pub fn schema() -> ToolSchema {
        ToolSchema::for_args::<SearchArgs>(
            "Search the knowledge base. The knowledge base is in English, translate to and from \
             English if needed. Results are formatted as a source name first in square brackets, \
             followed by the text content, and a line with '-----' at the end of each result.",
        )
    }

    fn request(&self, query: &str) -> SearchRequest {
        let settings = &self.settings;
        let vector_queries = if settings.use_vector_query {
            vec![VectorQuery {
                kind: "text",
                text: query.to_string(),
                k: VECTOR_NEAREST_NEIGHBORS,
                fields: settings.embedding_field.clone(),
            }]
        } else {
            Vec::new()
        };
        SearchRequest {
            search: query.to_string(),
            query_type: if settings.semantic_configuration.is_some() {
                QueryType::Semantic
            } else {
                QueryType::Simple
            },
            semantic_configuration: settings.semantic_configuration.clone(),
            search_fields: None,
            vector_queries,
            select: [settings.identifier_field.as_str(), settings.content_field.as_str()].join(","),
            top: SEARCH_TOP,
        }
    }
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn call(&self, args: ToolArgs) -> Result<ToolResult> {
        let args: SearchArgs = parse_args(args)?;
        info!(query = %args.query, "Searching the knowledge base");

        let hits = self.backend.search(self.request(&args.query)).await?;
        let mut text = String::new();
        for hit in &hits {
            text.push_str(&format!(
                "[{}]: {}\n-----\n",
                field_text(hit, &self.settings.identifier_field),
                field_text(hit, &self.settings.content_field)
            ));
        }
        Ok(ToolResult::to_server(text))
    }
}

/// Arguments of the `report_grounding` tool.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GroundingArgs {
    /// List of source names from last statement actually used, do not include the ones not used to formulate a response
    pub sources: Vec<String>,
}

/// Source keys are interpolated into a full-syntax query, so only plain key
/// characters are accepted.
pub fn is_valid_source_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '-'))
}

pub struct GroundingTool {
    backend: Arc<dyn SearchBackend>,
    settings: Arc<SearchSettings>,
}

impl GroundingTool {
    pub fn schema() -> ToolSchema {
        ToolSchema::for_args::<GroundingArgs>(
            "Report use of a source from the knowledge base as part of an answer (effectively, \
             cite the source). Sources appear in square brackets before each knowledge base \
             passage. Always use this tool to cite sources when responding with information from \
             the knowledge base.",
        )
    }
}

#[async_trait]
impl ToolHandler for GroundingTool {
    async fn call(&self, args: ToolArgs) -> Result<ToolResult> {
        let args: GroundingArgs = parse_args(args)?;
        let sources: Vec<&str> = args
            .sources
            .iter()
            .map(String::as_str)
            .filter(|s| is_valid_source_key(s))
            .collect();
        if sources.is_empty() {
            return Ok(ToolResult::to_client(json!({ "sources": [] }).to_string()));
        }
        let query = sources.join(" OR ");
        info!(sources = %query, "Reporting grounding sources");

        let s = &self.settings;
        let request = SearchRequest {
            search: query,
            query_type: QueryType::Full,
            search_fields: Some(s.identifier_field.clone()),
            select: [
                s.identifier_field.as_str(),
                s.title_field.as_str(),
                s.content_field.as_str(),
            ]
            .join(","),
            top: sources.len(),
            ..Default::default()
        };
        let docs: Vec<Value> = self
            .backend
            .search(request)
            .await?
            .iter()
            .map(|doc| {
                json!({
                    "chunk_id": field_text(doc, &s.identifier_field),
                    "title": field_text(doc, &s.title_field),
                    "chunk": field_text(doc, &s.content_field),
                })
            })
            .collect();
        Ok(ToolResult::to_client(json!({ "sources": docs }).to_string()))
    }
}

/// Registers `search` and `report_grounding` against the given backend.
pub fn attach_rag_tools(
    registry: &mut ToolRegistry,
    backend: Arc<dyn SearchBackend>,
    settings: SearchSettings,
) -> Result<(), ToolError> {
    let settings = Arc::new(settings);
    registry.register(
        "search",
        SearchTool::schema(),
        Arc::new(SearchTool {
            backend: backend.clone(),
            settings: settings.clone(),
        }),
    )?;
    registry.register(
        "report_grounding",
        GroundingTool::schema(),
        Arc::new(GroundingTool { backend, settings }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolResultDirection;
    use mockall::predicate::always;

    fn doc(id: &str, title: &str, chunk: &str) -> Document {
        let mut d = Document::new();
        d.insert("chunk_id".into(), json!(id));
        d.insert("title".into(), json!(title));
        d.insert("chunk".into(), json!(chunk));
        d
    }

    fn args(value: Value) -> ToolArgs {
        value.as_object().cloned().unwrap()
    }

    fn registry_with(backend: MockSearchBackend, settings: SearchSettings) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        attach_rag_tools(&mut registry, Arc::new(backend), settings).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_search_formats_hits_for_the_model() {
        let mut backend = MockSearchBackend::new();
        backend.expect_search().with(always()).times(1).returning(|_| {
            Ok(vec![
                doc("doc_1", "Billing", "Bills are due monthly."),
                doc("doc_2", "Outages", "Call 311 for outages."),
            ])
        });
        let registry = registry_with(backend, SearchSettings::default());

        let result = registry
            .lookup("search")
            .unwrap()
            .handler
            .call(args(json!({ "query": "when are bills due" })))
            .await
            .unwrap();

        assert_eq!(result.destination, ToolResultDirection::ToServer);
        assert_eq!(
            result.text,
            "[doc_1]: Bills are due monthly.\n-----\n[doc_2]: Call 311 for outages.\n-----\n"
        );
    }

    #[tokio::test]
    async fn test_search_request_honours_vector_toggle() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .withf(|req| {
                req.vector_queries.is_empty()
                    && req.query_type == QueryType::Simple
                    && req.select == "chunk_id,chunk"
                    && req.top == 5
            })
            .times(1)
            .returning(|_| Ok(vec![]));
        let settings = SearchSettings {
            use_vector_query: false,
            ..Default::default()
        };
        let registry = registry_with(backend, settings);

        let result = registry
            .lookup("search")
            .unwrap()
            .handler
            .call(args(json!({ "query": "water" })))
            .await
            .unwrap();
        assert_eq!(result.text, "");
    }

    #[tokio::test]
    async fn test_search_request_with_semantic_and_vector() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .withf(|req| {
                req.query_type == QueryType::Semantic
                    && req.semantic_configuration.as_deref() == Some("default")
                    && req.vector_queries.len() == 1
                    && req.vector_queries[0].k == 50
                    && req.vector_queries[0].fields == "text_vector"
            })
            .times(1)
            .returning(|_| Ok(vec![]));
        let settings = SearchSettings {
            semantic_configuration: Some("default".into()),
            ..Default::default()
        };
        let registry = registry_with(backend, settings);

        registry
            .lookup("search")
            .unwrap()
            .handler
            .call(args(json!({ "query": "water" })))
            .await
            .unwrap();
    }

    #[test]
    fn test_search_request_serializes_to_rest_shape() {
        let request = SearchRequest {
            search: "water".into(),
            query_type: QueryType::Semantic,
            semantic_configuration: Some("default".into()),
            vector_queries: vec![VectorQuery {
                kind: "text",
                text: "water".into(),
                k: 50,
                fields: "text_vector".into(),
            }],
            select: "chunk_id,chunk".into(),
            top: 5,
            ..Default::default()
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["queryType"], "semantic");
        assert_eq!(body["semanticConfiguration"], "default");
        assert_eq!(body["vectorQueries"][0]["kind"], "text");
        assert!(body.get("searchFields").is_none());
    }

    #[tokio::test]
    async fn test_grounding_filters_keys_and_targets_client() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .withf(|req| {
                req.search == "doc_1 OR doc-2"
                    && req.query_type == QueryType::Full
                    && req.search_fields.as_deref() == Some("chunk_id")
                    && req.top == 2
            })
            .times(1)
            .returning(|_| Ok(vec![doc("doc_1", "Billing", "Bills are due monthly.")]));
        let registry = registry_with(backend, SearchSettings::default());

        let result = registry
            .lookup("report_grounding")
            .unwrap()
            .handler
            .call(args(json!({ "sources": ["doc_1", "doc-2", "bad key\" OR *"] })))
            .await
            .unwrap();

        assert_eq!(result.destination, ToolResultDirection::ToClient);
        let payload: Value = serde_json::from_str(&result.text).unwrap();
        assert_eq!(payload["sources"][0]["chunk_id"], "doc_1");
        assert_eq!(payload["sources"][0]["title"], "Billing");
    }

    #[tokio::test]
    async fn test_grounding_without_valid_sources_skips_search() {
        let mut backend = MockSearchBackend::new();
        backend.expect_search().times(0);
        let registry = registry_with(backend, SearchSettings::default());

        let result = registry
            .lookup("report_grounding")
            .unwrap()
            .handler
            .call(args(json!({ "sources": ["a b"] })))
            .await
            .unwrap();
        assert_eq!(result.text, r#"{"sources":[]}"#);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_an_error() {
        let backend = MockSearchBackend::new();
        let registry = registry_with(backend, SearchSettings::default());

        let outcome = registry
            .lookup("search")
            .unwrap()
            .handler
            .call(args(json!({ "q": "typo" })))
            .await;
        assert!(outcome.is_err());
    }

    #[test]
    fn test_source_key_validation() {
        assert!(is_valid_source_key("abc_123=="));
        assert!(is_valid_source_key("a-b"));
        assert!(!is_valid_source_key(""));
        assert!(!is_valid_source_key("a b"));
        assert!(!is_valid_source_key("a*"));
    }
}
