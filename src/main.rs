use std::env;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pricecast_backend::services::artifact_store::{
    ArtifactStore, LocalArtifactStore, ObjectArtifactStore,
};
use pricecast_backend::services::job_runner::{JobRunner, JobRunnerConfig};
use pricecast_backend::services::price_model::PriceModelService;
use pricecast_backend::stores::{InMemoryGroupStore, InMemoryModelIndexStore};
use pricecast_backend::{AppState, handlers};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pricecast_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Artifact storage backend is a deployment-time switch, not per-call
    let artifacts: Arc<dyn ArtifactStore> = match env::var("STORAGE_BACKEND").as_deref() {
        Ok("object") => {
            let base_url =
                env::var("BLOB_STORE_URL").expect("BLOB_STORE_URL must be set for object storage");
            let bucket = env::var("BLOB_STORE_BUCKET")
                .expect("BLOB_STORE_BUCKET must be set for object storage");
            let token = env::var("BLOB_STORE_TOKEN").unwrap_or_default();
            tracing::info!("Using object storage backend at {}", base_url);
            Arc::new(ObjectArtifactStore::new(base_url, bucket, token))
        }
        _ => {
            let base_dir = env::var("ARTIFACT_DIR").unwrap_or_else(|_| "tmp/artifacts".into());
            tracing::info!("Using local artifact storage under {}", base_dir);
            Arc::new(LocalArtifactStore::new(base_dir))
        }
    };

    // One runner per process; its worker thread starts here
    let runner = JobRunner::new(JobRunnerConfig {
        max_concurrent: env_usize("MAX_CONCURRENT_TRAININGS", 2),
        queue_capacity: env_usize("TRAINING_QUEUE_SIZE", 20),
    });

    // In-memory stand-ins for the relational stores owned by the wider app
    let groups = Arc::new(InMemoryGroupStore::new());
    let index = Arc::new(InMemoryModelIndexStore::new());

    let state = AppState {
        price_model: PriceModelService::new(runner, artifacts, groups, index),
    };

    // Build router
    let app = handlers::ml::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let port = env::var("ML_PORT").unwrap_or_else(|_| "3010".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("Failed to bind server port");

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
