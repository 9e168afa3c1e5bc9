//! WebSocket handler for the realtime change feed.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tabsync_engine::{FeedMessage, FeedRequest};
use tokio::sync::mpsc;

use crate::websocket::ConnectionManager;

/// Handle an established feed connection.
///
/// The connection is registered for the tenant named at upgrade time; row
/// changes reach it only after a `subscribe` request installs its filters.
pub async fn handle_feed_connection(
    socket: WebSocket,
    conn_manager: Arc<ConnectionManager>,
    tenant_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<FeedMessage>();
    let conn_id = conn_manager.register(tenant_id.clone(), tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize feed message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_request(&text, &conn_manager, &conn_id);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::debug!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        tenant = %tenant_id,
        active_connections = conn_manager.connection_count(),
        "feed client disconnected"
    );
}

/// Answer one client request.
pub fn process_request(text: &str, conn_manager: &ConnectionManager, conn_id: &str) -> FeedMessage {
    let request: FeedRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => return FeedMessage::error(format!("Invalid message format: {}", e)),
    };

    match request {
        FeedRequest::Subscribe { tenant_id, filters } => {
            match conn_manager.subscribe(conn_id, &tenant_id, filters) {
                Ok(tables) => FeedMessage::Subscribed { tenant_id, tables },
                Err(e) => {
                    tracing::warn!(conn_id = %conn_id, error = %e, "subscription refused");
                    FeedMessage::error(e.to_string())
                }
            }
        }
        FeedRequest::Ping => FeedMessage::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_engine::{tenant_filters, Table};

    fn subscribe_json(tenant: &str) -> String {
        serde_json::to_string(&FeedRequest::Subscribe {
            tenant_id: tenant.to_string(),
            filters: tenant_filters(&[Table::Inventory, Table::Restaurants], tenant),
        })
        .unwrap()
    }

    #[test]
    fn subscribe_and_ping() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = manager.register("t1".into(), tx);

        assert_eq!(
            process_request(&subscribe_json("t1"), &manager, &conn),
            FeedMessage::Subscribed {
                tenant_id: "t1".into(),
                tables: 2
            }
        );
        assert_eq!(process_request(r#"{"type":"ping"}"#, &manager, &conn), FeedMessage::Pong);
    }

    #[test]
    fn foreign_subscription_is_an_error() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = manager.register("t1".into(), tx);

        let reply = process_request(&subscribe_json("t2"), &manager, &conn);
        assert!(matches!(reply, FeedMessage::Error { .. }));
    }

    #[test]
    fn garbage_is_an_error() {
        let manager = ConnectionManager::new();
        let reply = process_request("{not json", &manager, "c1");
        assert!(matches!(reply, FeedMessage::Error { message } if message.starts_with("Invalid message format")));
    }
}
