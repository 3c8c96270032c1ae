use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::MlError;

/// The four co-addressed blobs produced by one training run. Written as a
/// unit; no partial set is a supported resting state.
#[derive(Debug, Clone)]
pub struct ArtifactPayload {
    pub model: Vec<u8>,
    pub scaler: Vec<u8>,
    pub feature_means: Vec<u8>,
    pub training_chart: Vec<u8>,
}

/// The persisted triad read back at prediction time.
#[derive(Debug, Clone)]
pub struct ArtifactBytes {
    pub model: Vec<u8>,
    pub scaler: Vec<u8>,
    pub feature_means: Vec<u8>,
}

fn model_key(fingerprint: &str) -> String {
    format!("models/model_{fingerprint}.bin")
}

fn scaler_key(fingerprint: &str) -> String {
    format!("scalers/scaler_{fingerprint}.bin")
}

fn feature_means_key(fingerprint: &str) -> String {
    format!("features/feature_means_{fingerprint}.json")
}

fn training_chart_key(fingerprint: &str) -> String {
    format!("graphs/training_graph_{fingerprint}.png")
}

fn prediction_chart_key(fingerprint: &str) -> String {
    format!("graphs/prediction_graph_{fingerprint}.png")
}

/// Persistence contract for the artifact set, keyed by dataset fingerprint.
///
/// The backend is chosen once at startup; callers must record the model index
/// mapping only after `save` has returned Ok, so a partial write never leaves
/// the index pointing at missing artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, fingerprint: &str, payload: &ArtifactPayload) -> Result<(), MlError>;

    async fn load(&self, fingerprint: &str) -> Result<ArtifactBytes, MlError>;

    async fn save_prediction_chart(&self, fingerprint: &str, png: &[u8]) -> Result<(), MlError>;

    /// Best-effort removal of every blob belonging to the fingerprint.
    async fn delete_all(&self, fingerprint: &str) -> Result<(), MlError>;

    /// Download URL for the training chart, when the backend can issue one.
    async fn training_chart_url(&self, fingerprint: &str) -> Result<Option<String>, MlError>;

    /// Download URL for the latest prediction chart, when the backend can
    /// issue one.
    async fn prediction_chart_url(&self, fingerprint: &str) -> Result<Option<String>, MlError>;
}

/// Filesystem-backed artifact store for single-node deployments.
pub struct LocalArtifactStore {
    base_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), MlError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MlError::ArtifactIo(format!("failed to create {parent:?}: {e}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| MlError::ArtifactIo(format!("failed to write {path:?}: {e}")))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, MlError> {
        let path = self.path_for(key);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MlError::NotFound(format!("model artifact {key}"))
            } else {
                MlError::ArtifactIo(format!("failed to read {path:?}: {e}"))
            }
        })
    }

    async fn remove(&self, key: &str) {
        let path = self.path_for(key);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not delete artifact {:?}: {}", path, e);
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(&self, fingerprint: &str, payload: &ArtifactPayload) -> Result<(), MlError> {
        self.write(&model_key(fingerprint), &payload.model).await?;
        self.write(&scaler_key(fingerprint), &payload.scaler).await?;
        self.write(&feature_means_key(fingerprint), &payload.feature_means)
            .await?;
        self.write(&training_chart_key(fingerprint), &payload.training_chart)
            .await?;
        tracing::info!(
            "Saved artifact set for {} under {:?}",
            fingerprint,
            self.base_dir
        );
        Ok(())
    }

    async fn load(&self, fingerprint: &str) -> Result<ArtifactBytes, MlError> {
        Ok(ArtifactBytes {
            model: self.read(&model_key(fingerprint)).await?,
            scaler: self.read(&scaler_key(fingerprint)).await?,
            feature_means: self.read(&feature_means_key(fingerprint)).await?,
        })
    }

    async fn save_prediction_chart(&self, fingerprint: &str, png: &[u8]) -> Result<(), MlError> {
        self.write(&prediction_chart_key(fingerprint), png).await
    }

    async fn delete_all(&self, fingerprint: &str) -> Result<(), MlError> {
        self.remove(&model_key(fingerprint)).await;
        self.remove(&scaler_key(fingerprint)).await;
        self.remove(&feature_means_key(fingerprint)).await;
        self.remove(&training_chart_key(fingerprint)).await;
        self.remove(&prediction_chart_key(fingerprint)).await;
        Ok(())
    }

    async fn training_chart_url(&self, _fingerprint: &str) -> Result<Option<String>, MlError> {
        Ok(None)
    }

    async fn prediction_chart_url(&self, _fingerprint: &str) -> Result<Option<String>, MlError> {
        Ok(None)
    }
}

/// Artifact store backed by an opaque HTTP blob gateway.
///
/// The gateway exposes `PUT/GET/DELETE {base}/{bucket}/{key}` guarded by a
/// bearer token, plus `GET {base}/presign/{bucket}/{key}` returning a
/// time-limited download URL for chart retrieval.
pub struct ObjectArtifactStore {
    client: Client,
    base_url: String,
    bucket: String,
    token: String,
}

impl ObjectArtifactStore {
    pub fn new(base_url: String, bucket: String, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
            token,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.bucket, key)
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), MlError> {
        let response = self
            .client
            .put(self.object_url(key))
            .bearer_auth(&self.token)
            .header("content-type", content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| MlError::ArtifactIo(format!("blob store unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MlError::ArtifactIo(format!(
                "blob store error {status} while writing {key}: {error_text}"
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, MlError> {
        let response = self
            .client
            .get(self.object_url(key))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| MlError::ArtifactIo(format!("blob store unreachable: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MlError::NotFound(format!("model artifact {key}")));
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MlError::ArtifactIo(format!(
                "blob store error {status} while reading {key}: {error_text}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MlError::ArtifactIo(format!("failed to read blob body: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) {
        match self
            .client
            .delete(self.object_url(key))
            .bearer_auth(&self.token)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
                    tracing::warn!("Could not delete blob {}: status {}", key, status);
                }
            }
            Err(e) => tracing::warn!("Could not delete blob {}: {}", key, e),
        }
    }

    async fn presign(&self, key: &str) -> Result<String, MlError> {
        let url = format!("{}/presign/{}/{}", self.base_url, self.bucket, key);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("expires", "3600")])
            .send()
            .await
            .map_err(|e| MlError::ArtifactIo(format!("blob store unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(MlError::ArtifactIo(format!(
                "blob store error {status} while presigning {key}"
            )));
        }
        response
            .text()
            .await
            .map(|url| url.trim().to_string())
            .map_err(|e| MlError::ArtifactIo(format!("failed to read presigned URL: {e}")))
    }
}

#[async_trait]
impl ArtifactStore for ObjectArtifactStore {
    async fn save(&self, fingerprint: &str, payload: &ArtifactPayload) -> Result<(), MlError> {
        self.put(
            &model_key(fingerprint),
            &payload.model,
            "application/octet-stream",
        )
        .await?;
        self.put(
            &scaler_key(fingerprint),
            &payload.scaler,
            "application/octet-stream",
        )
        .await?;
        self.put(
            &feature_means_key(fingerprint),
            &payload.feature_means,
            "application/json",
        )
        .await?;
        self.put(
            &training_chart_key(fingerprint),
            &payload.training_chart,
            "image/png",
        )
        .await?;
        tracing::info!(
            "Uploaded artifact set for {} to bucket {}",
            fingerprint,
            self.bucket
        );
        Ok(())
    }

    async fn load(&self, fingerprint: &str) -> Result<ArtifactBytes, MlError> {
        Ok(ArtifactBytes {
            model: self.get(&model_key(fingerprint)).await?,
            scaler: self.get(&scaler_key(fingerprint)).await?,
            feature_means: self.get(&feature_means_key(fingerprint)).await?,
        })
    }

    async fn save_prediction_chart(&self, fingerprint: &str, png: &[u8]) -> Result<(), MlError> {
        self.put(&prediction_chart_key(fingerprint), png, "image/png")
            .await
    }

    async fn delete_all(&self, fingerprint: &str) -> Result<(), MlError> {
        self.delete(&model_key(fingerprint)).await;
        self.delete(&scaler_key(fingerprint)).await;
        self.delete(&feature_means_key(fingerprint)).await;
        self.delete(&training_chart_key(fingerprint)).await;
        self.delete(&prediction_chart_key(fingerprint)).await;
        Ok(())
    }

    async fn training_chart_url(&self, fingerprint: &str) -> Result<Option<String>, MlError> {
        self.presign(&training_chart_key(fingerprint))
            .await
            .map(Some)
    }

    async fn prediction_chart_url(&self, fingerprint: &str) -> Result<Option<String>, MlError> {
        self.presign(&prediction_chart_key(fingerprint))
            .await
            .map(Some)
    }
}
