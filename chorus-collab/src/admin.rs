//! Administrative HTTP surface.
//!
//! - `GET    /rooms`        - every room as `{name, state}`
//! - `GET    /rooms/{name}` - one room, or 404
//! - `POST   /rooms/{name}` - merge a binary document update (room created if absent)
//! - `DELETE /rooms/{name}` - disconnect all members and discard the room, or 404
//!
//! `HEAD` and `OPTIONS` answer an empty 200 on both paths. CORS is permissive.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::registry::{RegistryError, SessionRegistry};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("room not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Registry(RegistryError::Document(_) | RegistryError::Protocol(_)) => {
                StatusCode::BAD_REQUEST
            }
            AdminError::Registry(RegistryError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Admin request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    let body_limit = registry.config().max_message_bytes;
    Router::new()
        .route(
            "/rooms",
            get(list_rooms).head(empty_ok).options(empty_ok),
        )
        .route(
            "/rooms/:name",
            get(get_room)
                .post(merge_room)
                .delete(delete_room)
                .head(empty_ok)
                .options(empty_ok),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(registry)
}

/// Serve the admin router on `listener` until the process exits.
pub async fn serve(listener: TcpListener, registry: Arc<SessionRegistry>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Admin HTTP listening on {addr}");
    }
    axum::serve(listener, router(registry)).await
}

async fn empty_ok() -> StatusCode {
    StatusCode::OK
}

async fn list_rooms(State(registry): State<Arc<SessionRegistry>>) -> Json<Vec<Value>> {
    let rooms = registry.rooms().await;
    Json(rooms.iter().map(|room| room.to_json()).collect())
}

async fn get_room(
    State(registry): State<Arc<SessionRegistry>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AdminError> {
    let room = registry
        .room(&name)
        .await
        .ok_or(AdminError::NotFound(name))?;
    Ok(Json(room.to_json()))
}

async fn merge_room(
    State(registry): State<Arc<SessionRegistry>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AdminError> {
    registry.merge_update(&name, &body).await?;
    log::info!("Merged {} byte update into room {name}", body.len());
    Ok(Json(json!({ "ok": true })))
}

async fn delete_room(
    State(registry): State<Arc<SessionRegistry>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AdminError> {
    if registry.delete_room(&name).await? {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(AdminError::NotFound(name))
    }
}
