//! Replay timeline endpoint.

use crate::audit::ReplayTimeline;
use crate::error::ApiResult;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

/// GET /api/replay/{request_id}
pub async fn get_replay(
    State(state): State<SharedState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<ReplayTimeline>> {
    let timeline = state.audit.replay(request_id).await?;
    Ok(Json(timeline))
}
