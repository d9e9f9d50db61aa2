//! Approval listing and resolution endpoints.

use crate::approval::{ApprovalRequest, ApprovalStatus};
use crate::error::{ApiResult, AppError};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ListApprovalsQuery {
    pub status: Option<String>,
}

/// GET /api/approvals?status=pending
pub async fn list_approvals(
    State(state): State<SharedState>,
    Query(query): Query<ListApprovalsQuery>,
) -> ApiResult<Json<Vec<ApprovalRequest>>> {
    let status_raw = query.status.as_deref().unwrap_or("pending");
    let status = ApprovalStatus::parse(status_raw)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown status '{}'", status_raw)))?;

    let approvals = state.approvals.list_by_status(status).await?;
    Ok(Json(approvals))
}

/// GET /api/approvals/{request_id}
pub async fn get_approval(
    State(state): State<SharedState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<ApprovalRequest>> {
    let approval = state.approvals.get(request_id).await?.ok_or_else(|| {
        AppError::NotFound(format!("No approval request for request {}", request_id))
    })?;
    Ok(Json(approval))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApprovalCallbackRequest {
    pub request_id: Uuid,
    pub approved: bool,
    #[validate(length(min = 1, max = 255))]
    pub approver_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalCallbackResponse {
    pub status: ApprovalStatus,
    pub approved: bool,
}

/// POST /api/approvals/callback
///
/// Resolves a pending approval. A duplicate callback for an already
/// decided request gets a 409 and leaves the original decision intact.
pub async fn approval_callback(
    State(state): State<SharedState>,
    Json(request): Json<ApprovalCallbackRequest>,
) -> ApiResult<Json<ApprovalCallbackResponse>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let status = state
        .approvals
        .resolve(
            request.request_id,
            request.approved,
            &request.approver_id,
            request.reason.as_deref(),
        )
        .await?;

    Ok(Json(ApprovalCallbackResponse {
        status,
        approved: request.approved,
    }))
}
