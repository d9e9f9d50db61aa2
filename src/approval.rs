//! Approval coordinator
//!
//! Tracks the lifecycle of actions the policy flagged as requiring a human
//! decision. An approval request is created pending, transitions exactly
//! once to approved or denied, and is never reversed: a second resolution
//! attempt is rejected rather than overwriting the original decision.
//! Resolution does not re-execute the gated action; the external notifier
//! observes the outcome and re-submits through the executor.

use crate::error::AppError;
use crate::models::{RequestContext, ToolName};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Lifecycle state of an approval request. Monotonic:
/// pending -> approved or pending -> denied, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "denied" => Some(ApprovalStatus::Denied),
            _ => None,
        }
    }

}

/// A human-approval gate for one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub approval_id: Uuid,
    pub request_id: Uuid,
    pub user_id: String,
    pub role: String,
    pub tool: String,
    pub inputs: Value,
    pub reason: String,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

/// Store for approval requests, backed by `internal.approval_requests`.
#[derive(Clone)]
pub struct ApprovalStore {
    pool: Pool,
}

impl ApprovalStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a pending approval request gating one tool call.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        tool: ToolName,
        inputs: &Value,
        reason: &str,
    ) -> Result<Uuid, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO internal.approval_requests (
                    request_id, platform_user_id, user_role, tool_name,
                    tool_inputs, reason, status
                ) VALUES ($1, $2, $3, $4, $5, $6, 'pending')
                RETURNING approval_id",
                &[
                    &ctx.request_id,
                    &ctx.display_user_id,
                    &ctx.role,
                    &tool.as_str(),
                    inputs,
                    &reason,
                ],
            )
            .await?;

        let approval_id: Uuid = row.get(0);
        info!(
            approval_id = %approval_id,
            request_id = %ctx.request_id,
            tool = %tool,
            "Approval request created"
        );
        Ok(approval_id)
    }

    /// Resolve the pending approval requests for a request id.
    ///
    /// The update is guarded by `status = 'pending'`, so a duplicate
    /// callback cannot overwrite the original decision: it gets a
    /// Conflict instead. Missing request ids get NotFound. When one
    /// request id carries several gated tool calls, the approver is
    /// deciding on the turn as a whole, so every pending gate for the
    /// request id resolves at once.
    pub async fn resolve(
        &self,
        request_id: Uuid,
        approved: bool,
        approver_id: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalStatus, AppError> {
        let status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };

        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE internal.approval_requests
                 SET status = $1,
                     approver_id = $2,
                     approver_reason = $3,
                     decided_at = NOW()
                 WHERE request_id = $4 AND status = 'pending'",
                &[&status.as_str(), &approver_id, &reason, &request_id],
            )
            .await?;

        if updated == 0 {
            // Distinguish "never existed" from "already decided".
            let existing = client
                .query_opt(
                    "SELECT status FROM internal.approval_requests WHERE request_id = $1",
                    &[&request_id],
                )
                .await?;
            return match existing {
                Some(row) => {
                    let current: String = row.get(0);
                    Err(AppError::Conflict(format!(
                        "Approval for request {} already decided ({})",
                        request_id, current
                    )))
                }
                None => Err(AppError::NotFound(format!(
                    "No approval request for request {}",
                    request_id
                ))),
            };
        }

        info!(
            request_id = %request_id,
            approver_id = %approver_id,
            status = status.as_str(),
            "Approval request resolved"
        );
        Ok(status)
    }

    /// Fetch the approval request gating a request id, if any.
    ///
    /// Several gated tool calls in one turn share a request id and so
    /// produce several rows; the newest gate is the one reported.
    pub async fn get(&self, request_id: Uuid) -> Result<Option<ApprovalRequest>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT approval_id, request_id, platform_user_id, user_role, tool_name,
                        tool_inputs, reason, status, approver_id, approver_reason,
                        created_at, decided_at
                 FROM internal.approval_requests
                 WHERE request_id = $1
                 ORDER BY created_at DESC",
                &[&request_id],
            )
            .await?;

        Ok(newest(rows.into_iter().map(Self::row_to_request).collect()))
    }

    /// List approval requests by status, newest first.
    pub async fn list_by_status(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT approval_id, request_id, platform_user_id, user_role, tool_name,
                        tool_inputs, reason, status, approver_id, approver_reason,
                        created_at, decided_at
                 FROM internal.approval_requests
                 WHERE status = $1
                 ORDER BY created_at DESC
                 LIMIT 50",
                &[&status.as_str()],
            )
            .await?;

        Ok(rows.into_iter().map(Self::row_to_request).collect())
    }

    fn row_to_request(row: tokio_postgres::Row) -> ApprovalRequest {
        let status_raw: String = row.get("status");
        let inputs: Option<Value> = row.get("tool_inputs");
        ApprovalRequest {
            approval_id: row.get("approval_id"),
            request_id: row.get("request_id"),
            user_id: row.get("platform_user_id"),
            role: row.get("user_role"),
            tool: row.get("tool_name"),
            inputs: inputs.unwrap_or(Value::Null),
            reason: row.get("reason"),
            status: ApprovalStatus::parse(&status_raw).unwrap_or(ApprovalStatus::Pending),
            approver_id: row.get("approver_id"),
            approver_reason: row.get("approver_reason"),
            created_at: row.get("created_at"),
            decided_at: row.get("decided_at"),
        }
    }
}

/// Pick the newest gate when one request id carries several of them.
fn newest(requests: Vec<ApprovalRequest>) -> Option<ApprovalRequest> {
    requests.into_iter().max_by_key(|r| r.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    // Mirror of the `status = 'pending'` guard in `resolve`, kept here to
    // pin down the allowed transitions.
    impl ApprovalStatus {
        fn can_transition_to(&self, next: ApprovalStatus) -> bool {
            matches!(
                (self, next),
                (
                    ApprovalStatus::Pending,
                    ApprovalStatus::Approved | ApprovalStatus::Denied
                )
            )
        }
    }

    fn gate(request_id: Uuid, tool: &str, created_at: DateTime<Utc>) -> ApprovalRequest {
        ApprovalRequest {
            approval_id: Uuid::new_v4(),
            request_id,
            user_id: "U123".to_string(),
            role: "marketing".to_string(),
            tool: tool.to_string(),
            inputs: Value::Null,
            reason: "customer contact data".to_string(),
            status: ApprovalStatus::Pending,
            approver_id: None,
            approver_reason: None,
            created_at,
            decided_at: None,
        }
    }

    #[test]
    fn test_newest_gate_wins_when_request_id_is_shared() {
        let request_id = Uuid::new_v4();
        let t0 = Utc::now();
        let older = gate(request_id, "run_query", t0);
        let newer = gate(request_id, "search_documents", t0 + TimeDelta::seconds(2));
        let newer_id = newer.approval_id;

        let picked = newest(vec![older, newer]).unwrap();
        assert_eq!(picked.approval_id, newer_id);
        assert_eq!(picked.tool, "search_documents");
    }

    #[test]
    fn test_newest_of_empty_is_none() {
        assert!(newest(Vec::new()).is_none());
    }

    #[test]
    fn test_pending_can_transition_to_decided() {
        assert!(ApprovalStatus::Pending.can_transition_to(ApprovalStatus::Approved));
        assert!(ApprovalStatus::Pending.can_transition_to(ApprovalStatus::Denied));
    }

    #[test]
    fn test_decided_states_are_terminal() {
        assert!(!ApprovalStatus::Approved.can_transition_to(ApprovalStatus::Denied));
        assert!(!ApprovalStatus::Approved.can_transition_to(ApprovalStatus::Pending));
        assert!(!ApprovalStatus::Denied.can_transition_to(ApprovalStatus::Approved));
        assert!(!ApprovalStatus::Pending.can_transition_to(ApprovalStatus::Pending));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Denied,
        ] {
            assert_eq!(ApprovalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApprovalStatus::parse("bogus"), None);
    }
}
