use anyhow::Result;
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::db::models::{Accident, Severity, UpdateAccident};
use crate::db::repositories::AccidentStore;
use crate::error::Error;
use crate::messaging::broadcast::Broadcaster;

/// Response of the external detection service
#[derive(Debug, Deserialize)]
struct DetectionResponse {
    is_accident: bool,
    confidence: f64,
    severity: Option<Severity>,
}

/// Dispatches images to the external classification service and merges
/// results back into the store.
///
/// Exactly one attempt per record, bounded by the client timeout. Failures
/// are logged and leave the record untouched.
pub struct ClassifierService {
    http: reqwest::Client,
    config: ClassifierConfig,
    store: Arc<dyn AccidentStore>,
    broadcaster: Arc<Broadcaster>,
}

impl ClassifierService {
    pub fn new(
        config: ClassifierConfig,
        store: Arc<dyn AccidentStore>,
        broadcaster: Arc<Broadcaster>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Classifier(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            store,
            broadcaster,
        })
    }

    /// Detach a verification task for a freshly created record
    pub fn spawn_verify(self: Arc<Self>, accident: Accident) {
        tokio::spawn(async move {
            if let Err(e) = self.verify(&accident).await {
                warn!("ML verification failed for {}: {}", accident.id, e);
            }
        });
    }

    async fn verify(&self, accident: &Accident) -> Result<()> {
        let url = format!("{}/detect", self.config.base_url);
        let body = serde_json::json!({
            "image": accident.image_base64,
            "accident_id": accident.id,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Classifier(format!("Detection request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Classifier(format!("Detection service error: {}", e)))?;

        let result: DetectionResponse = response
            .json()
            .await
            .map_err(|e| Error::Classifier(format!("Malformed detection response: {}", e)))?;

        info!(
            "ML result for {}: accident={}, confidence={:.2}",
            accident.id, result.is_accident, result.confidence
        );

        let changes = UpdateAccident {
            verified: Some(result.is_accident),
            ml_confidence: Some(result.confidence),
            severity: result.severity,
            ..Default::default()
        };

        let updated = self
            .store
            .update(accident.id, &changes)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Accident vanished during verification: {}", accident.id))
            })?;

        self.broadcaster.broadcast_updated(&updated).await;

        Ok(())
    }
}
