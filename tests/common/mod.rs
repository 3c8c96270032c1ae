use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use serde_json::{Value, json};
use tempfile::TempDir;

use pricecast_backend::AppState;
use pricecast_backend::handlers;
use pricecast_backend::services::artifact_store::LocalArtifactStore;
use pricecast_backend::services::job_runner::{JobRunner, JobRunnerConfig};
use pricecast_backend::services::price_model::PriceModelService;
use pricecast_backend::stores::{GroupRecord, InMemoryGroupStore, InMemoryModelIndexStore, ItemRecord};

pub const OWNER_ID: i64 = 7;
pub const GROUP_ID: i64 = 1;
pub const ITEM_ID: i64 = 101;

pub struct TestApp {
    pub router: Router,
    // Keeps the artifact directory alive for the test's duration.
    pub _artifact_dir: TempDir,
}

/// Daily rising price history in the upstream tick format, e.g.
/// `["Jan 01 2024 00:", 10.0, "5"]`.
pub fn linear_price_history(days: u32) -> Value {
    let prices: Vec<Value> = (0..days)
        .map(|i| {
            let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                + chrono::Duration::days(i as i64);
            json!([
                format!("{} 00:", date.format("%b %d %Y")),
                10.0 + i as f64,
                format!("{}", 5 + i % 3)
            ])
        })
        .collect();
    json!({ "prices": prices })
}

pub fn test_app_with_history(price_history: Value) -> TestApp {
    let artifact_dir = TempDir::new().expect("Failed to create artifact directory");

    let groups = Arc::new(InMemoryGroupStore::new());
    groups.insert_group(GroupRecord {
        id: GROUP_ID,
        owner_id: OWNER_ID,
        name: "Test Group".to_string(),
        has_model: false,
    });
    groups.insert_item(
        GROUP_ID,
        ItemRecord {
            id: ITEM_ID,
            name: "Falchion Knife".to_string(),
            price_history,
        },
    );

    let state = AppState {
        price_model: PriceModelService::new(
            JobRunner::new(JobRunnerConfig::default()),
            Arc::new(LocalArtifactStore::new(artifact_dir.path())),
            groups,
            Arc::new(InMemoryModelIndexStore::new()),
        ),
    };

    TestApp {
        router: handlers::ml::router(state),
        _artifact_dir: artifact_dir,
    }
}

pub fn test_app() -> TestApp {
    test_app_with_history(linear_price_history(20))
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
