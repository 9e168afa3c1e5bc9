//! WebSocket client for the server's `/realtime` change feed.

use super::http::TENANT_HEADER;
use super::{ChangeFeed, FeedStream, RemoteError};
use crate::TenantContext;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tabsync_engine::{FeedMessage, FeedRequest, TableFilter};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// [`ChangeFeed`] over one WebSocket connection per subscription.
#[derive(Debug, Clone)]
pub struct WsChangeFeed {
    url: String,
    api_token: Option<String>,
}

impl WsChangeFeed {
    pub fn new(url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_token,
        }
    }

    /// Feed of the server whose HTTP API lives at `base_url`.
    pub fn from_http_base(base_url: &str, api_token: Option<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        Self::new(format!("{ws_base}/realtime"), api_token)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn header(value: &str) -> Result<HeaderValue, RemoteError> {
    HeaderValue::from_str(value).map_err(|e| RemoteError::Network(format!("invalid header value: {e}")))
}

/// Translate one frame into a stream item; `None` frames are skipped.
fn decode_frame(frame: Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<Result<tabsync_engine::ChangeEvent, RemoteError>> {
    match frame {
        Ok(Message::Text(text)) => match serde_json::from_str::<FeedMessage>(text.as_str()) {
            Ok(FeedMessage::Change(event)) => Some(Ok(event)),
            Ok(FeedMessage::Subscribed { tenant_id, tables }) => {
                debug!(tenant = %tenant_id, tables, "subscription confirmed");
                None
            }
            Ok(FeedMessage::Pong) => None,
            Ok(FeedMessage::Error { message }) => {
                warn!(error = %message, "change feed reported an error");
                Some(Err(RemoteError::Rejected(message)))
            }
            Err(e) => Some(Err(RemoteError::Decode(e.to_string()))),
        },
        Ok(Message::Close(_)) => Some(Err(RemoteError::Closed)),
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn subscribe(&self, ctx: &TenantContext, filters: Vec<TableFilter>) -> Result<FeedStream, RemoteError> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(TENANT_HEADER, header(ctx.tenant_id())?);
        if let Some(token) = &self.api_token {
            headers.insert("authorization", header(&format!("Bearer {token}"))?);
        }

        let (mut socket, _response) = tokio_tungstenite::connect_async(request).await?;

        let subscribe = FeedRequest::Subscribe {
            tenant_id: ctx.tenant_id().to_string(),
            filters,
        };
        let text = serde_json::to_string(&subscribe).map_err(|e| RemoteError::Decode(e.to_string()))?;
        socket.send(Message::text(text)).await?;
        debug!(url = %self.url, tenant = %ctx.tenant_id(), "change feed connected");

        Ok(socket
            .filter_map(|frame| futures::future::ready(decode_frame(frame)))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabsync_engine::{ChangeEvent, Table};

    #[test]
    fn realtime_url_from_http_base() {
        assert_eq!(
            WsChangeFeed::from_http_base("http://localhost:3000/", None).url(),
            "ws://localhost:3000/realtime"
        );
        assert_eq!(
            WsChangeFeed::from_http_base("https://sync.example.com", None).url(),
            "wss://sync.example.com/realtime"
        );
    }

    #[test]
    fn change_frames_become_events() {
        let event = ChangeEvent::delete(Table::Vendors, json!({"id": "v1", "tenant_id": "t1"}));
        let text = serde_json::to_string(&FeedMessage::Change(event.clone())).unwrap();

        assert_eq!(decode_frame(Ok(Message::text(text))), Some(Ok(event)));
    }

    #[test]
    fn control_frames_are_skipped() {
        let subscribed = serde_json::to_string(&FeedMessage::Subscribed {
            tenant_id: "t1".into(),
            tables: 14,
        })
        .unwrap();
        assert_eq!(decode_frame(Ok(Message::text(subscribed))), None);
        assert_eq!(decode_frame(Ok(Message::text(r#"{"type":"pong"}"#))), None);
        assert_eq!(decode_frame(Ok(Message::Ping(Vec::new().into()))), None);
    }

    #[test]
    fn bad_frames() {
        assert!(matches!(
            decode_frame(Ok(Message::text("{not json"))),
            Some(Err(RemoteError::Decode(_)))
        ));
        assert_eq!(
            decode_frame(Ok(Message::text(r#"{"type":"error","message":"bad filter"}"#))),
            Some(Err(RemoteError::Rejected("bad filter".into())))
        );
        assert_eq!(decode_frame(Ok(Message::Close(None))), Some(Err(RemoteError::Closed)));
    }
}
