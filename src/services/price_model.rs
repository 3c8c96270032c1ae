use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use moka::future::Cache;
use serde_json::Value;

use crate::error::MlError;
use crate::services::artifact_store::{ArtifactPayload, ArtifactStore};
use crate::services::chart;
use crate::services::features::{self, FeatureMeans};
use crate::services::fingerprint;
use crate::services::job_runner::JobRunner;
use crate::services::predictor::{self, PredictionPoint};
use crate::services::scaler::FeatureScaler;
use crate::services::trainer::{self, PriceForest, TrainingMetrics};
use crate::stores::{GroupStore, ItemRecord, ModelIndexRecord, ModelIndexStore};

/// Deserialized artifact triad, cached per fingerprint.
pub struct ModelBundle {
    pub model: PriceForest,
    pub scaler: FeatureScaler,
    pub feature_means: FeatureMeans,
}

/// Result of training one item.
pub struct TrainedModel {
    pub item_id: i64,
    pub item_name: String,
    pub fingerprint: String,
    pub metrics: TrainingMetrics,
    pub chart: Vec<u8>,
    pub chart_url: Option<String>,
}

/// Result of predicting one item over a date range.
pub struct Prediction {
    pub points: Vec<PredictionPoint>,
    pub chart: Vec<u8>,
    pub chart_url: Option<String>,
}

/// Orchestrates the train → persist → predict lifecycle.
///
/// Holds the process-wide job runner, the configured artifact store and the
/// collaborator stores. Constructed once at startup and shared by cloning.
#[derive(Clone)]
pub struct PriceModelService {
    runner: JobRunner,
    artifacts: Arc<dyn ArtifactStore>,
    groups: Arc<dyn GroupStore>,
    index: Arc<dyn ModelIndexStore>,
    bundles: Cache<String, Arc<ModelBundle>>,
}

impl PriceModelService {
    pub fn new(
        runner: JobRunner,
        artifacts: Arc<dyn ArtifactStore>,
        groups: Arc<dyn GroupStore>,
        index: Arc<dyn ModelIndexStore>,
    ) -> Self {
        let bundles = Cache::builder()
            .max_capacity(64)
            .time_to_live(Duration::from_secs(300))
            .build();
        Self {
            runner,
            artifacts,
            groups,
            index,
            bundles,
        }
    }

    /// Cheap structural check of the raw price-history envelope.
    pub fn validate(&self, price_history: &Value) -> Result<(), String> {
        features::validate_price_history(price_history)
    }

    /// Train a model for every item in the group.
    ///
    /// A group that already has models is rejected; it must be deleted first.
    /// The index record for an item is written only after its artifact set
    /// has been fully persisted.
    pub async fn train_group(
        &self,
        owner_id: i64,
        username: &str,
        group_id: i64,
    ) -> Result<Vec<TrainedModel>, MlError> {
        let group = self
            .groups
            .get_group(group_id)
            .await?
            .filter(|g| g.owner_id == owner_id)
            .ok_or_else(|| MlError::NotFound(format!("group {group_id}")))?;
        if group.has_model {
            return Err(MlError::Validation(
                "models already exist for this group, delete them before retraining".to_string(),
            ));
        }

        let items = self.groups.get_group_items(owner_id, group_id).await?;
        if items.is_empty() {
            return Err(MlError::NotFound(format!("items for group {group_id}")));
        }

        let mut trained = Vec::with_capacity(items.len());
        for item in items {
            features::validate_price_history(&item.price_history).map_err(|reason| {
                MlError::Validation(format!(
                    "invalid price history for item {}: {reason}",
                    item.id
                ))
            })?;

            let result = self.train_item(owner_id, username, &item).await?;
            self.index
                .save_index(ModelIndexRecord {
                    owner_id,
                    group_id,
                    item_id: item.id,
                    fingerprint: result.fingerprint.clone(),
                    created_at: Utc::now(),
                })
                .await?;
            trained.push(result);
        }

        self.groups.set_has_model(group_id, true).await?;
        Ok(trained)
    }

    async fn train_item(
        &self,
        owner_id: i64,
        username: &str,
        item: &ItemRecord,
    ) -> Result<TrainedModel, MlError> {
        let ticks = features::parse_ticks(&item.price_history);
        let table = features::normalize_prices(&ticks)?;

        let salt = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let fingerprint = fingerprint::fingerprint_dataset(owner_id, item.id, &salt, &table)?;
        tracing::info!(
            "Training model {} for item {} ({}) of user {}",
            fingerprint,
            item.name,
            item.id,
            username
        );

        let training_table = table.clone();
        let output = self
            .runner
            .submit(&format!("item {} / user {}", item.id, owner_id), move || {
                trainer::train_and_evaluate(&training_table)
            })
            .await
            .map_err(|e| match e {
                MlError::Training(reason) => {
                    MlError::Training(format!("item '{}': {reason}", item.name))
                }
                other => other,
            })?;

        let scaled = output.scaler.transform(&table.feature_rows());
        let fitted = trainer::predict_scaled(&output.model, &scaled)?;
        let title = format!(
            "Actual vs Predicted Price for user {username}, item {}",
            item.name
        );
        let chart_png = chart::render_training_chart(&title, &table.times(), &table.prices(), &fitted)?;

        let feature_means = table.feature_means();
        let payload = ArtifactPayload {
            model: bincode::serialize(&output.model)
                .map_err(|e| MlError::ArtifactIo(format!("failed to serialize model: {e}")))?,
            scaler: bincode::serialize(&output.scaler)
                .map_err(|e| MlError::ArtifactIo(format!("failed to serialize scaler: {e}")))?,
            feature_means: serde_json::to_vec(&feature_means).map_err(|e| {
                MlError::ArtifactIo(format!("failed to serialize feature means: {e}"))
            })?,
            training_chart: chart_png.clone(),
        };
        self.artifacts.save(&fingerprint, &payload).await?;
        let chart_url = self.artifacts.training_chart_url(&fingerprint).await?;

        tracing::info!(
            "Trained item {} ({}): mse={:.4} r2={:.4}",
            item.name,
            fingerprint,
            output.metrics.mse,
            output.metrics.r2
        );

        Ok(TrainedModel {
            item_id: item.id,
            item_name: item.name.clone(),
            fingerprint,
            metrics: output.metrics,
            chart: chart_png,
            chart_url,
        })
    }

    /// Predict daily prices for one item over `[start, end]` using its most
    /// recently trained model.
    pub async fn predict_item(
        &self,
        owner_id: i64,
        username: &str,
        group_id: i64,
        item_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Prediction, MlError> {
        self.groups
            .get_group(group_id)
            .await?
            .filter(|g| g.owner_id == owner_id)
            .ok_or_else(|| MlError::NotFound(format!("group {group_id}")))?;

        let items = self.groups.get_group_items(owner_id, group_id).await?;
        let item = items
            .into_iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| MlError::NotFound(format!("item {item_id} in group {group_id}")))?;

        let record = self
            .index
            .get_index(owner_id, item_id)
            .await?
            .ok_or_else(|| MlError::NotFound(format!("model for item {item_id}")))?;

        let bundle = self.load_bundle(&record.fingerprint).await?;
        let points = predictor::predict_range(
            &bundle.model,
            &bundle.scaler,
            &bundle.feature_means,
            start,
            end,
        )?;

        let title = format!("Predicted Price for user {username}, item {}", item.name);
        let chart_png = chart::render_prediction_chart(&title, &points)?;
        self.artifacts
            .save_prediction_chart(&record.fingerprint, &chart_png)
            .await?;
        let chart_url = self.artifacts.prediction_chart_url(&record.fingerprint).await?;

        Ok(Prediction {
            points,
            chart: chart_png,
            chart_url,
        })
    }

    /// Delete the index records and artifact sets of every item in the group.
    pub async fn delete_group_models(
        &self,
        owner_id: i64,
        group_id: i64,
    ) -> Result<Vec<String>, MlError> {
        let items = self.groups.get_group_items(owner_id, group_id).await?;

        let mut fingerprints = Vec::new();
        for item in &items {
            if let Some(record) = self.index.get_index(owner_id, item.id).await? {
                fingerprints.push(record.fingerprint);
            }
        }

        let deleted = self.index.delete_index(owner_id, group_id).await?;
        if !deleted {
            return Err(MlError::NotFound(format!("models for group {group_id}")));
        }

        for fingerprint in &fingerprints {
            self.artifacts.delete_all(fingerprint).await?;
            self.bundles.invalidate(fingerprint).await;
        }
        self.groups.set_has_model(group_id, false).await?;

        tracing::info!(
            "Deleted {} model artifact sets for group {}",
            fingerprints.len(),
            group_id
        );
        Ok(fingerprints)
    }

    async fn load_bundle(&self, fingerprint: &str) -> Result<Arc<ModelBundle>, MlError> {
        if let Some(bundle) = self.bundles.get(fingerprint).await {
            tracing::debug!("Artifact cache hit for {}", fingerprint);
            return Ok(bundle);
        }

        let bytes = self.artifacts.load(fingerprint).await?;
        let model = bincode::deserialize(&bytes.model).map_err(|e| {
            MlError::ArtifactIo(format!(
                "model artifact for '{fingerprint}' is unreadable: {e}"
            ))
        })?;
        let scaler = bincode::deserialize(&bytes.scaler).map_err(|e| {
            MlError::ArtifactIo(format!(
                "scaler artifact for '{fingerprint}' is unreadable: {e}"
            ))
        })?;
        let feature_means = serde_json::from_slice(&bytes.feature_means).map_err(|e| {
            MlError::ArtifactIo(format!(
                "feature-means artifact for '{fingerprint}' is unreadable: {e}"
            ))
        })?;

        let bundle = Arc::new(ModelBundle {
            model,
            scaler,
            feature_means,
        });
        self.bundles
            .insert(fingerprint.to_string(), bundle.clone())
            .await;
        Ok(bundle)
    }
}
