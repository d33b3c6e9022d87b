//! Shared fixtures for unit tests: an in-memory store mirroring the
//! repository semantics, a wired service harness, and an in-process
//! detection server.

use anyhow::Result;
use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ClassifierConfig;
use crate::db::models::{Accident, Location, NewAccident, Severity, Status, UpdateAccident};
use crate::db::repositories::accidents::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::db::repositories::{AccidentStore, CountPredicate, ListFilter};
use crate::messaging::broadcast::Broadcaster;
use crate::services::{AccidentService, ClassifierService};

/// In-memory accident store with the same semantics as the Postgres
/// repository
#[derive(Default)]
pub struct MemoryAccidentStore {
    records: Mutex<Vec<Accident>>,
}

#[async_trait]
impl AccidentStore for MemoryAccidentStore {
    async fn insert(&self, new: NewAccident) -> Result<Accident> {
        let accident = Accident {
            id: Uuid::new_v4(),
            image_base64: new.image_base64,
            timestamp: Utc::now(),
            location: new.location,
            severity: new.severity,
            verified: false,
            ml_confidence: None,
            device_id: new.device_id,
            address: None,
            status: Status::Pending,
        };
        self.records.lock().await.push(accident.clone());
        Ok(accident)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Accident>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Accident>> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT) as usize;

        let mut records: Vec<Accident> = self
            .records
            .lock()
            .await
            .iter()
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);

        Ok(records)
    }

    async fn update(&self, id: Uuid, changes: &UpdateAccident) -> Result<Option<Accident>> {
        let mut records = self.records.lock().await;
        let record = match records.iter_mut().find(|a| a.id == id) {
            Some(record) => record,
            None => return Ok(None),
        };

        if let Some(status) = changes.status {
            record.status = status;
        }
        if let Some(severity) = changes.severity {
            record.severity = severity;
        }
        if let Some(address) = &changes.address {
            record.address = Some(address.clone());
        }
        if let Some(verified) = changes.verified {
            record.verified = verified;
        }
        if let Some(confidence) = changes.ml_confidence {
            record.ml_confidence = Some(confidence);
        }

        Ok(Some(record.clone()))
    }

    async fn count(&self, predicate: CountPredicate) -> Result<i64> {
        let records = self.records.lock().await;
        let count = match predicate {
            CountPredicate::All => records.len(),
            CountPredicate::Severity(severity) => {
                records.iter().filter(|a| a.severity == severity).count()
            }
            CountPredicate::Status(status) => {
                records.iter().filter(|a| a.status == status).count()
            }
            CountPredicate::Today => {
                let midnight = Local::now()
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .expect("valid midnight")
                    .and_local_timezone(Local)
                    .single()
                    .expect("unambiguous midnight")
                    .with_timezone(&Utc);
                records.iter().filter(|a| a.timestamp >= midnight).count()
            }
        };

        Ok(count as i64)
    }
}

pub struct TestHarness {
    pub service: Arc<AccidentService>,
    pub store: Arc<MemoryAccidentStore>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Wire a service against a given detection endpoint
pub fn harness_with_detector(base_url: &str, timeout_secs: u64) -> TestHarness {
    let store = Arc::new(MemoryAccidentStore::default());
    let broadcaster = Arc::new(Broadcaster::new());
    let classifier = Arc::new(
        ClassifierService::new(
            ClassifierConfig {
                base_url: base_url.to_string(),
                timeout_secs,
            },
            store.clone(),
            broadcaster.clone(),
        )
        .expect("classifier"),
    );
    let service = Arc::new(AccidentService::new(
        store.clone(),
        broadcaster.clone(),
        classifier,
    ));

    TestHarness {
        service,
        store,
        broadcaster,
    }
}

/// Harness whose detector is unreachable: verification tasks fail fast and
/// touch nothing
pub fn harness() -> TestHarness {
    harness_with_detector("http://127.0.0.1:9", 1)
}

/// Spawn an in-process detection server returning `response` after `delay`;
/// returns its base URL
pub async fn spawn_detector(response: serde_json::Value, delay: Duration) -> String {
    let app = Router::new().route(
        "/detect",
        post(move |Json(_): Json<serde_json::Value>| {
            let response = response.clone();
            async move {
                tokio::time::sleep(delay).await;
                Json(response)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind detector");
    let addr = listener.local_addr().expect("detector addr");

    let server = axum::Server::from_tcp(listener.into_std().expect("std listener"))
        .expect("detector server");
    tokio::spawn(server.serve(app.into_make_service()));

    format!("http://{}", addr)
}

/// Receive the next session frame as parsed JSON, failing after two seconds
pub async fn recv_frame(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("session channel closed");
    serde_json::from_str(&frame).expect("valid frame")
}

pub fn sample_accident() -> Accident {
    Accident {
        id: Uuid::new_v4(),
        image_base64: "aGVsbG8=".to_string(),
        timestamp: Utc::now(),
        location: Location { lat: 19.07, lng: 72.87 },
        severity: Severity::Medium,
        verified: false,
        ml_confidence: None,
        device_id: Some("ESP32-01".to_string()),
        address: None,
        status: Status::Pending,
    }
}
