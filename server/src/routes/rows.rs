//! Row endpoints, one resource per synced table.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde_json::Value;
use tabsync_engine::Table;

use crate::auth::{AuthUser, Tenant};
use crate::error::Result;
use crate::handlers::{handle_delete, handle_delete_where, handle_select, handle_upsert, ColumnQuery};
use crate::AppState;

/// Create row routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/rest/{table}",
            post(upsert_handler).get(select_handler).delete(delete_where_handler),
        )
        .route("/rest/{table}/{key}", delete(delete_handler))
}

/// POST /rest/{table} - Upsert rows.
async fn upsert_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    tenant: Tenant,
    Path(table): Path<String>,
    Json(rows): Json<Vec<Value>>,
) -> Result<StatusCode> {
    let table: Table = table.parse()?;
    handle_upsert(
        &state.pool,
        &state.registry,
        &state.conn_manager,
        table,
        tenant.as_str(),
        rows,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /rest/{table}?column=&value= - Select rows.
async fn select_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    tenant: Tenant,
    Path(table): Path<String>,
    Query(query): Query<ColumnQuery>,
) -> Result<Json<Vec<Value>>> {
    let table: Table = table.parse()?;
    let rows = handle_select(&state.pool, table, tenant.as_str(), &query).await?;
    Ok(Json(rows))
}

/// DELETE /rest/{table}?column=&value= - Delete matching rows.
async fn delete_where_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    tenant: Tenant,
    Path(table): Path<String>,
    Query(query): Query<ColumnQuery>,
) -> Result<StatusCode> {
    let table: Table = table.parse()?;
    handle_delete_where(&state.pool, &state.conn_manager, table, tenant.as_str(), &query).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /rest/{table}/{key} - Delete one row.
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    tenant: Tenant,
    Path((table, key)): Path<(String, String)>,
) -> Result<StatusCode> {
    let table: Table = table.parse()?;
    handle_delete(&state.pool, &state.conn_manager, table, tenant.as_str(), &key).await?;
    Ok(StatusCode::NO_CONTENT)
}
