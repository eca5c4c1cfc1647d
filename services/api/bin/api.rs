//! Main Entrypoint for the Revision API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Building the language model client and the tutor.
//! 4. Constructing the Axum router.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use revision_api::{config::Config, db::Db, router::create_router, state::AppState};
use revision_core::{
    Tutor,
    llm_client::{Generator, OpenAICompatibleClient},
    prompts::PromptBook,
    store::ContentStore,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
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
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Db::new(pool);
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");
    let store: Arc<dyn ContentStore> = Arc::new(db);

    // --- 4. Initialize the Tutor ---
    let api_key = config
        .api_key()
        .context("API key for the configured provider is missing")?;
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(config.provider.base_url());
    let llm_client = OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
        config.llm_temperature,
    );
    let generator = Generator::new(Arc::new(llm_client), config.llm_timeout);

    let prompts = PromptBook::load_dir(&config.prompts_path)?;
    let tutor = Tutor::new(store.clone(), generator, Arc::new(prompts));

    let app_state = Arc::new(AppState {
        tutor: Arc::new(tutor),
        store,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router ---
    let app = create_router(app_state);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
