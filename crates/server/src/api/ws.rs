//! WebSocket push channel for live stage events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use conduit_core::pipeline::StageEvent;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use super::AppState;

pub async fn stage_events_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let events = state.notifier.subscribe();
    tracing::debug!(
        subscribers = state.notifier.subscriber_count(),
        "Viewer connected"
    );

    // Forward stage events to the viewer
    let mut send_task = tokio::spawn(forward_events(events, sender));

    // Viewers only listen; drain input until they close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::debug!("Viewer disconnected");
}

/// Send every event as a JSON text frame until the channel closes or the
/// viewer goes away. Lagged viewers skip what they missed.
async fn forward_events<S>(mut events: broadcast::Receiver<StageEvent>, mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Viewer lagged, events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode stage event");
                continue;
            }
        };
        if sink.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::pipeline::Notifier;
    use futures::channel::mpsc;
    use serde_json::Value;

    fn frame_json(frame: Message) -> Value {
        match frame {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_are_forwarded_as_json() {
        let notifier = Notifier::new(16);
        let (tx, rx) = mpsc::unbounded();
        let forward = tokio::spawn(forward_events(notifier.subscribe(), tx));

        notifier.publish(StageEvent::messages(7, Vec::new()));
        drop(notifier);
        forward.await.unwrap();

        let frames: Vec<Message> = rx.collect().await;
        assert_eq!(frames.len(), 1);
        let json = frame_json(frames.into_iter().next().unwrap());
        assert_eq!(json["type"], "messages");
        assert_eq!(json["stageId"], 7);
        assert_eq!(json["messages"], Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn test_lagged_viewer_skips_dropped_events() {
        let notifier = Notifier::new(1);
        let events = notifier.subscribe();
        notifier.publish(StageEvent::messages(1, Vec::new()));
        notifier.publish(StageEvent::messages(2, Vec::new()));
        drop(notifier);

        let (tx, rx) = mpsc::unbounded();
        forward_events(events, tx).await;

        let stage_ids: Vec<Value> = rx
            .map(|frame| frame_json(frame)["stageId"].clone())
            .collect()
            .await;
        assert_eq!(stage_ids, vec![Value::from(2)]);
    }

    #[tokio::test]
    async fn test_forwarding_stops_when_viewer_is_gone() {
        let notifier = Notifier::new(16);
        let (tx, rx) = mpsc::unbounded();
        drop(rx);
        let forward = tokio::spawn(forward_events(notifier.subscribe(), tx));

        notifier.publish(StageEvent::messages(3, Vec::new()));

        // Ends on the failed send while the notifier is still alive
        forward.await.unwrap();
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
