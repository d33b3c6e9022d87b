use std::time::Duration;

use crate::config::BrokerConfig;
use crate::db::models::{Severity, Status};
use crate::db::repositories::{AccidentStore, CountPredicate};
use crate::messaging::broadcast::Broadcaster;
use crate::messaging::mqtt::MqttIngest;
use crate::testutil::{harness, recv_frame, sample_accident};

#[tokio::test]
async fn disconnect_is_idempotent() {
    let broadcaster = Broadcaster::new();
    let (id, _rx) = broadcaster.connect().await;
    assert_eq!(broadcaster.session_count().await, 1);

    broadcaster.disconnect(id).await;
    broadcaster.disconnect(id).await;
    broadcaster.disconnect(uuid::Uuid::new_v4()).await;
    assert_eq!(broadcaster.session_count().await, 0);
}

#[tokio::test]
async fn broadcast_reaches_all_sessions_and_prunes_dead_ones() {
    let broadcaster = Broadcaster::new();
    let (_id1, rx1) = broadcaster.connect().await;
    let (_id2, mut rx2) = broadcaster.connect().await;

    // First session goes away without saying goodbye
    drop(rx1);

    broadcaster.broadcast_created(&sample_accident()).await;

    let frame = recv_frame(&mut rx2).await;
    assert_eq!(frame["event"], "new-accident");
    assert_eq!(frame["data"]["_event"], "new");
    assert_eq!(frame["data"]["deviceId"], "ESP32-01");

    // The dead session was pruned during the broadcast
    assert_eq!(broadcaster.session_count().await, 1);
}

#[tokio::test]
async fn per_session_delivery_preserves_broadcast_order() {
    let broadcaster = Broadcaster::new();
    let (_id, mut rx) = broadcaster.connect().await;

    let accident = sample_accident();
    broadcaster.broadcast_created(&accident).await;
    broadcaster.broadcast_updated(&accident).await;

    assert_eq!(recv_frame(&mut rx).await["event"], "new-accident");
    assert_eq!(recv_frame(&mut rx).await["event"], "accident-update");
}

#[tokio::test]
async fn subscribe_requires_a_live_session() {
    let broadcaster = Broadcaster::new();
    let (id, _rx) = broadcaster.connect().await;

    assert!(broadcaster.subscribe(id, "severity-high").await);
    assert!(!broadcaster.subscribe(uuid::Uuid::new_v4(), "severity-high").await);

    broadcaster.disconnect(id).await;
    assert!(!broadcaster.subscribe(id, "severity-low").await);
}

#[tokio::test]
async fn send_to_targets_a_single_session() {
    let broadcaster = Broadcaster::new();
    let (id, mut rx) = broadcaster.connect().await;
    let (_other, mut other_rx) = broadcaster.connect().await;

    let delivered = broadcaster
        .send_to(
            id,
            &crate::messaging::broadcast::OutboundEvent::Subscribed {
                severity: Severity::High,
            },
        )
        .await;
    assert!(delivered);

    let frame = recv_frame(&mut rx).await;
    assert_eq!(frame["event"], "subscribed");
    assert_eq!(frame["data"]["severity"], "high");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(other_rx.try_recv().is_err());

    assert!(
        !broadcaster
            .send_to(
                uuid::Uuid::new_v4(),
                &crate::messaging::broadcast::OutboundEvent::Pong { timestamp: 1 }
            )
            .await
    );
}

fn ingest_for(service: std::sync::Arc<crate::services::AccidentService>) -> MqttIngest {
    MqttIngest::new(BrokerConfig::default(), service)
}

#[tokio::test]
async fn report_without_image_is_dropped_without_side_effects() {
    let h = harness();
    let (_id, mut rx) = h.broadcaster.connect().await;
    let ingest = ingest_for(h.service.clone());

    let outcome = ingest
        .handle_message("traffic/accident", br#"{"location":"1.0,2.0","severity":"high"}"#)
        .await;
    assert!(outcome.is_ok());

    assert_eq!(h.store.count(CountPredicate::All).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unparseable_report_is_rejected() {
    let h = harness();
    let ingest = ingest_for(h.service.clone());

    assert!(ingest
        .handle_message("traffic/accident", b"not json at all")
        .await
        .is_err());
    // Strict enum validation applies to broker payloads too
    assert!(ingest
        .handle_message("traffic/accident", br#"{"image":"abc","severity":"huge"}"#)
        .await
        .is_err());

    assert_eq!(h.store.count(CountPredicate::All).await.unwrap(), 0);
}

#[tokio::test]
async fn valid_report_is_stored_and_broadcast() {
    let h = harness();
    let (_id, mut rx) = h.broadcaster.connect().await;
    let ingest = ingest_for(h.service.clone());

    ingest
        .handle_message(
            "traffic/accident",
            br#"{"image":"aGVsbG8=","location":"19.07,72.87","severity":"high"}"#,
        )
        .await
        .unwrap();

    let stored = h
        .store
        .list(&Default::default())
        .await
        .unwrap()
        .pop()
        .expect("stored record");
    assert_eq!(stored.severity, Severity::High);
    assert_eq!(stored.status, Status::Pending);
    assert_eq!(stored.location.lat, 19.07);
    // Devices that do not identify themselves get the sentinel id
    assert_eq!(stored.device_id.as_deref(), Some("unknown"));

    let frame = recv_frame(&mut rx).await;
    assert_eq!(frame["event"], "new-accident");
    assert_eq!(frame["data"]["id"], stored.id.to_string());
}

#[tokio::test]
async fn image_base64_key_and_device_id_are_honored() {
    let h = harness();
    let ingest = ingest_for(h.service.clone());

    ingest
        .handle_message(
            "traffic/accident",
            br#"{"imageBase64":"aGVsbG8=","deviceId":"ESP32-07"}"#,
        )
        .await
        .unwrap();

    let stored = h
        .store
        .list(&Default::default())
        .await
        .unwrap()
        .pop()
        .expect("stored record");
    assert_eq!(stored.device_id.as_deref(), Some("ESP32-07"));
    // Omitted fields take ingestion defaults
    assert_eq!(stored.severity, Severity::Medium);
    assert_eq!(stored.location.lat, 0.0);
    assert_eq!(stored.location.lng, 0.0);
}
