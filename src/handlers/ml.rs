use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::AppState;
use crate::error::MlError;
use crate::models::ml::{
    DeleteModelsRequest, DeleteModelsResponse, HealthResponse, MetricsBody, PredictRequest,
    PredictResponse, PredictionEntry, TrainRequest, TrainResponse, TrainedModelEntry,
    ValidateResponse,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ml/validate", post(validate_price_history))
        .route("/ml/groups/{group_id}/train", post(train_group_models))
        .route("/ml/groups/{group_id}/predict", post(predict_item_prices))
        .route("/ml/groups/{group_id}/models", delete(delete_group_models))
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

pub async fn validate_price_history(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Json<ValidateResponse> {
    match state.price_model.validate(&payload) {
        Ok(()) => Json(ValidateResponse {
            valid: true,
            error: String::new(),
        }),
        Err(reason) => Json(ValidateResponse {
            valid: false,
            error: reason,
        }),
    }
}

pub async fn train_group_models(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<TrainRequest>,
) -> Result<Json<TrainResponse>, MlError> {
    let trained = state
        .price_model
        .train_group(request.user_id, &request.username, group_id)
        .await?;

    Ok(Json(TrainResponse {
        success: true,
        trained_models: trained
            .into_iter()
            .map(|model| TrainedModelEntry {
                item_id: model.item_id,
                item_name: model.item_name,
                data_hash: model.fingerprint,
                metrics: MetricsBody {
                    mse: model.metrics.mse,
                    r2: model.metrics.r2,
                },
                graph: BASE64.encode(&model.chart),
                graph_url: model.chart_url,
            })
            .collect(),
    }))
}

pub async fn predict_item_prices(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, MlError> {
    let start = parse_request_date(&request.start_time)?;
    let end = parse_request_date(&request.end_time)?;

    let prediction = state
        .price_model
        .predict_item(
            request.user_id,
            &request.username,
            group_id,
            request.item_id,
            start,
            end,
        )
        .await?;

    Ok(Json(PredictResponse {
        graph: BASE64.encode(&prediction.chart),
        graph_url: prediction.chart_url,
        predictions: prediction
            .points
            .iter()
            .map(|point| PredictionEntry {
                date: point.date.format("%Y-%m-%d").to_string(),
                predicted_price: point.price,
            })
            .collect(),
    }))
}

pub async fn delete_group_models(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<DeleteModelsRequest>,
) -> Result<Json<DeleteModelsResponse>, MlError> {
    let deleted = state
        .price_model
        .delete_group_models(request.user_id, group_id)
        .await?;

    Ok(Json(DeleteModelsResponse {
        success: true,
        group_id,
        deleted_models: deleted.len(),
    }))
}

fn parse_request_date(raw: &str) -> Result<NaiveDate, MlError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|t| t.date()))
        .map_err(|_| MlError::Validation(format!("'{raw}' is not an ISO 8601 date")))
}
