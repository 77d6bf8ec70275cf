//! Task panel endpoints: snapshot, live stream, and the form operations.
//!
//! Every handler resolves the caller's session to its panel actor through
//! the hub; the actor serializes operations and publishes snapshots, so
//! handlers never touch panel state directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::stream::Stream;
use uuid::Uuid;

use super::auth::AuthUser;
use super::routes::AppState;
use super::types::{SubmitRequest, SuccessResponse};
use crate::panel::{PanelError, PanelSnapshot};
use crate::store::StoreError;

fn panel_error(e: PanelError) -> (StatusCode, String) {
    let status = match &e {
        PanelError::EmptyText => StatusCode::BAD_REQUEST,
        PanelError::UnknownTask(_) => StatusCode::NOT_FOUND,
        PanelError::NotEditing => StatusCode::CONFLICT,
        PanelError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        PanelError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string())
}

/// Current panel state for the caller's session.
pub async fn get_panel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<PanelSnapshot> {
    let handle = state.hub.panel(user.sid, user.identity()).await;
    Json(handle.snapshot())
}

/// Live panel state via SSE.
///
/// Emits one `state` event with the current snapshot immediately, then one
/// per change. The stream ends when the session signs out.
pub async fn stream_panel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let handle = state.hub.panel(user.sid, user.identity()).await;
    let mut rx = handle.watch();

    let stream = async_stream::stream! {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            let event = Event::default()
                .event("state")
                .json_data(&snapshot)
                .unwrap();
            yield Ok(event);

            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    Sse::new(stream)
}

/// Submit the form: creates a task, or updates the one being edited.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SuccessResponse>, (StatusCode, String)> {
    let handle = state.hub.panel(user.sid, user.identity()).await;
    handle.submit(req.text).await.map_err(panel_error)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Load a task into the edit form.
pub async fn begin_edit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, (StatusCode, String)> {
    let handle = state.hub.panel(user.sid, user.identity()).await;
    handle.begin_edit(id).await.map_err(panel_error)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Leave edit mode without saving.
pub async fn cancel_edit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SuccessResponse>, (StatusCode, String)> {
    let handle = state.hub.panel(user.sid, user.identity()).await;
    handle.cancel_edit().await.map_err(panel_error)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Delete a task. The client confirms with the user before calling.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, (StatusCode, String)> {
    let handle = state.hub.panel(user.sid, user.identity()).await;
    handle.remove(id).await.map_err(panel_error)?;
    Ok(Json(SuccessResponse { success: true }))
}
