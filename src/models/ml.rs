use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsBody {
    pub mse: f64,
    pub r2: f64,
}

#[derive(Debug, Serialize)]
pub struct TrainedModelEntry {
    pub item_id: i64,
    pub item_name: String,
    pub data_hash: String,
    pub metrics: MetricsBody,
    /// Base64-encoded PNG of the actual-vs-predicted training chart.
    pub graph: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub success: bool,
    pub trained_models: Vec<TrainedModelEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub user_id: i64,
    pub username: String,
    pub item_id: i64,
    /// ISO 8601 date (or datetime) of the first predicted day.
    pub start_time: String,
    /// ISO 8601 date (or datetime) of the last predicted day, inclusive.
    pub end_time: String,
}

#[derive(Debug, Serialize)]
pub struct PredictionEntry {
    pub date: String,
    pub predicted_price: f64,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    /// Base64-encoded PNG of the prediction chart.
    pub graph: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_url: Option<String>,
    pub predictions: Vec<PredictionEntry>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteModelsRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteModelsResponse {
    pub success: bool,
    pub group_id: i64,
    pub deleted_models: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
