pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export logic types
pub use logic::{
    audit_assignments, AssignmentError, AssignmentResult, AssignmentService, ConsistencyReport,
    RetryPolicy, SubjectSetDiff,
};

// Export all model types
pub use model::*;

// Export seed module
pub use seed::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

/// Build the HTTP application for a given store.
pub fn build_app<S: store::Store + 'static>(
    store: std::sync::Arc<S>,
    retry: RetryPolicy,
    auth: crate::config::AuthConfig,
) -> axum::Router {
    let service = std::sync::Arc::new(AssignmentService::new(store, retry));
    api::routes::create_router(auth).with_state(service)
}

/// Open the configured backend, optionally seed it and serve until shutdown.
pub async fn run_server(config: crate::config::AppConfig) -> anyhow::Result<()> {
    use std::sync::Arc;

    match config.storage.backend {
        crate::config::StorageBackend::Memory => {
            log::info!("Using in-memory document store");
            serve_store(Arc::new(MemoryStore::new()), &config).await
        }
        crate::config::StorageBackend::Postgres => {
            log::info!("Connecting to PostgreSQL...");
            let database_url = config.database_url()?;
            let postgres_store =
                PostgresStore::new(&database_url, config.max_connections()).await?;

            // Run migrations
            postgres_store.migrate().await?;
            log::info!("Database ready");
            serve_store(Arc::new(postgres_store), &config).await
        }
    }
}

async fn serve_store<S: store::Store + 'static>(
    store: std::sync::Arc<S>,
    config: &crate::config::AppConfig,
) -> anyhow::Result<()> {
    // Load seed data for demonstration (optional)
    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        log::info!("Loading seed data...");
        seed::load_seed_data(&*store).await?;
    }
    if config.auth.allow_dev_user {
        log::warn!("Requests without X-User-Id run as the development admin");
    }

    let app = build_app(store, config.assignment.retry_policy(), config.auth.clone());
    let bind_address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    log::info!("Server running on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
