//! Audit log listing endpoint (dashboard boundary).

use crate::audit::{AuditFilters, AuditListEntry};
use crate::error::ApiResult;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};

/// GET /api/audit?user_id=&tool=&decision=&since=&until=&limit=
pub async fn list_audit_logs(
    State(state): State<SharedState>,
    Query(filters): Query<AuditFilters>,
) -> ApiResult<Json<Vec<AuditListEntry>>> {
    let entries = state.audit.list(&filters).await?;
    Ok(Json(entries))
}
