use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{sink::SinkExt, stream::StreamExt};
use log::debug;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::rest::AppState;
use crate::db::models::Severity;
use crate::messaging::broadcast::{Broadcaster, OutboundEvent};

/// Commands a dashboard session may send
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SubscribeSeverity(Severity),
    Ping,
}

pub async fn handle_ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broadcaster))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut rx) = broadcaster.connect().await;

    // Forward everything queued for this session onto the wire
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Some(reply) = handle_client_event(&broadcaster, session_id, event).await
                    {
                        broadcaster.send_to(session_id, &reply).await;
                    }
                }
                Err(e) => debug!("Ignoring unrecognized client message: {}", e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    broadcaster.disconnect(session_id).await;
    send_task.abort();
}

/// Process one client command and produce the reply, if any
pub(crate) async fn handle_client_event(
    broadcaster: &Broadcaster,
    session_id: Uuid,
    event: ClientEvent,
) -> Option<OutboundEvent> {
    match event {
        ClientEvent::SubscribeSeverity(severity) => {
            broadcaster
                .subscribe(session_id, &format!("severity-{}", severity))
                .await;
            Some(OutboundEvent::Subscribed { severity })
        }
        ClientEvent::Ping => Some(OutboundEvent::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_accident;

    #[test]
    fn client_events_parse_from_json() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"subscribe-severity","data":"high"}"#).unwrap();
        assert!(matches!(event, ClientEvent::SubscribeSeverity(Severity::High)));

        let event: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Ping));

        assert!(serde_json::from_str::<ClientEvent>(
            r#"{"event":"subscribe-severity","data":"extreme"}"#
        )
        .is_err());
    }

    #[tokio::test]
    async fn subscribe_is_acknowledged() {
        let broadcaster = Broadcaster::new();
        let (session_id, _rx) = broadcaster.connect().await;

        let reply = handle_client_event(
            &broadcaster,
            session_id,
            ClientEvent::SubscribeSeverity(Severity::High),
        )
        .await
        .expect("ack");

        let frame = serde_json::to_value(&reply).unwrap();
        assert_eq!(frame["event"], "subscribed");
        assert_eq!(frame["data"]["severity"], "high");

        let rooms = broadcaster.rooms(session_id).await.expect("live session");
        assert!(rooms.contains("severity-high"));
    }

    #[tokio::test]
    async fn ping_yields_non_decreasing_pong_timestamps() {
        let broadcaster = Broadcaster::new();
        let (session_id, _rx) = broadcaster.connect().await;

        let first = handle_client_event(&broadcaster, session_id, ClientEvent::Ping)
            .await
            .expect("pong");
        let second = handle_client_event(&broadcaster, session_id, ClientEvent::Ping)
            .await
            .expect("pong");

        let (OutboundEvent::Pong { timestamp: t1 }, OutboundEvent::Pong { timestamp: t2 }) =
            (first, second)
        else {
            panic!("expected pong replies");
        };
        assert!(t1 > 0);
        assert!(t2 >= t1);
    }

    #[tokio::test]
    async fn subscribed_session_disconnecting_never_breaks_broadcast() {
        let broadcaster = Broadcaster::new();
        let (session_id, rx) = broadcaster.connect().await;

        handle_client_event(
            &broadcaster,
            session_id,
            ClientEvent::SubscribeSeverity(Severity::High),
        )
        .await;

        drop(rx);
        broadcaster.disconnect(session_id).await;
        broadcaster.disconnect(session_id).await;

        // A later broadcast must not error
        broadcaster.broadcast_created(&sample_accident()).await;
        assert_eq!(broadcaster.session_count().await, 0);
    }
}
