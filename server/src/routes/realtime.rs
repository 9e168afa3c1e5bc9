//! Change feed route.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::auth::{AuthUser, Tenant};
use crate::handlers::handle_feed_connection;
use crate::AppState;

/// Create realtime routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/realtime", get(realtime_handler))
}

/// GET /realtime - Upgrade to the change feed WebSocket.
async fn realtime_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Tenant(tenant_id): Tenant,
    ws: WebSocketUpgrade,
) -> Response {
    let conn_manager = state.conn_manager.clone();
    ws.on_upgrade(move |socket| handle_feed_connection(socket, conn_manager, tenant_id))
}
