mod clock;
mod config;
mod db;
mod engine;
mod error;
mod models;
mod routes;
mod store;

use std::sync::Arc;

use crate::{
    clock::SystemClock,
    config::Config,
    engine::{Engine, EngineSettings},
    models::AppState,
    store::{MemoryStore, PgStore, Store},
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;

    let store: Arc<dyn Store> = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::connect_pg(url, cfg.db_max_connections).await?;
            tracing::info!("Using Postgres store");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, data is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Engine::new(
        store,
        Arc::new(SystemClock),
        EngineSettings {
            patient_id_prefix: cfg.patient_id_prefix.clone(),
            patient_counter: cfg.patient_counter.clone(),
        },
    );
    let state = AppState {
        engine: Arc::new(engine),
    };

    // Browser clients call the API from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
