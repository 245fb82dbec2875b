//! Main Entrypoint for the VoiceRAG API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting to the form database, when one is configured, and running migrations.
//! 3. Attaching the search and form tools to the tool registry.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use sqlx::PgPool;
use std::{io, net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use voicerag_api::{config::Config, db::Db, router::create_router, state::AppState};
use voicerag_core::{
    ToolRegistry,
    forms::{FormStore, attach_form_tools},
    rag::{AzureSearchClient, SearchSettings, attach_rag_tools},
};

/// Used when the prompts directory has no `system_message.md`.
const DEFAULT_SYSTEM_MESSAGE: &str = include_str!("../prompts/system_message.md");

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn load_system_message(prompts_path: &Path) -> anyhow::Result<String> {
    let path = prompts_path.join("system_message.md");
    match std::fs::read_to_string(&path) {
        Ok(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
        Ok(_) => {
            warn!(path = %path.display(), "System message file is empty; using the built-in prompt.");
            Ok(DEFAULT_SYSTEM_MESSAGE.trim().to_string())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "System message file not found; using the built-in prompt.");
            Ok(DEFAULT_SYSTEM_MESSAGE.trim().to_string())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let store = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let db = Db::new(pool);
            db.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            let store: Arc<dyn FormStore> = Arc::new(db);
            Some(store)
        }
        None => {
            warn!("DATABASE_URL is not set; utility forms will not be saved.");
            None
        }
    };

    // --- 4. Attach Tools ---
    let mut tools = ToolRegistry::new();
    match &config.search {
        Some(search) => {
            let backend = AzureSearchClient::new(
                &search.endpoint,
                &search.index,
                search.credential.clone(),
            )?;
            let settings = SearchSettings {
                semantic_configuration: search.semantic_configuration.clone(),
                identifier_field: search.identifier_field.clone(),
                content_field: search.content_field.clone(),
                embedding_field: search.embedding_field.clone(),
                title_field: search.title_field.clone(),
                use_vector_query: search.use_vector_query,
            };
            attach_rag_tools(&mut tools, Arc::new(backend), settings)?;
        }
        None => warn!("Azure AI Search is not configured; search tools are disabled."),
    }
    attach_form_tools(&mut tools, store)?;
    info!(tools = %tools.list_names().join(", "), "Attached tools");

    let system_message = load_system_message(&config.prompts_path)?;
    let bind_address = config.bind_address;
    let deployment = config.realtime.deployment.clone();
    let app_state = Arc::new(AppState::new(config, tools, system_message));

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        %deployment,
        %bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
