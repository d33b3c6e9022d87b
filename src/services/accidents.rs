use anyhow::Result;
use log::info;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::models::{Accident, CreateAccident, NewAccident, Severity, Status, UpdateAccident};
use crate::db::repositories::{AccidentStore, CountPredicate, ListFilter};
use crate::error::Error;
use crate::messaging::broadcast::Broadcaster;
use crate::services::classifier::ClassifierService;

/// Aggregate counters for the dashboard header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccidentStats {
    pub total: i64,
    pub critical: i64,
    pub high: i64,
    pub pending: i64,
    pub today_count: i64,
}

/// Core accident service: the single creation path shared by every ingestion
/// adapter, plus queries, updates and stats.
pub struct AccidentService {
    store: Arc<dyn AccidentStore>,
    broadcaster: Arc<Broadcaster>,
    classifier: Arc<ClassifierService>,
}

impl AccidentService {
    pub fn new(
        store: Arc<dyn AccidentStore>,
        broadcaster: Arc<Broadcaster>,
        classifier: Arc<ClassifierService>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            classifier,
        }
    }

    /// Create an accident record: validate, insert durably, notify live
    /// sessions, then hand off to ML verification without awaiting it.
    pub async fn create(&self, req: CreateAccident) -> Result<Accident> {
        if req.image_base64.trim().is_empty() {
            return Err(Error::Validation("imageBase64 is required".to_string()).into());
        }
        let location = req
            .location
            .ok_or_else(|| Error::Validation("location is required".to_string()))?;

        let accident = self
            .store
            .insert(NewAccident {
                image_base64: req.image_base64,
                location,
                severity: req.severity.unwrap_or_default(),
                device_id: req.device_id,
            })
            .await?;

        info!("Accident recorded: {} [{}]", accident.id, accident.severity);

        self.broadcaster.broadcast_created(&accident).await;

        // Verification runs off the request path; its outcome never reaches
        // the producer.
        self.classifier.clone().spawn_verify(accident.clone());

        Ok(accident)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Accident>> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Accident>> {
        self.store.list(filter).await
    }

    /// Explicit operator update; last write wins against a concurrent
    /// verification result.
    pub async fn update(&self, id: Uuid, changes: &UpdateAccident) -> Result<Accident> {
        let updated = self
            .store
            .update(id, changes)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Accident not found: {}", id)))?;

        self.broadcaster.broadcast_updated(&updated).await;

        Ok(updated)
    }

    /// Point-in-time snapshot assembled from independent counts
    pub async fn stats(&self) -> Result<AccidentStats> {
        Ok(AccidentStats {
            total: self.store.count(CountPredicate::All).await?,
            critical: self
                .store
                .count(CountPredicate::Severity(Severity::Critical))
                .await?,
            high: self
                .store
                .count(CountPredicate::Severity(Severity::High))
                .await?,
            pending: self
                .store
                .count(CountPredicate::Status(Status::Pending))
                .await?,
            today_count: self.store.count(CountPredicate::Today).await?,
        })
    }
}
