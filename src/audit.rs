//! Audit recorder
//!
//! Durably persists one record per tool invocation, with PII-redacted
//! copies of the payloads alongside the raw ones, and reconstructs the
//! replay timeline for a request on demand. Persistence failure never
//! fails the tool call whose result has already been computed: the write
//! runs as a detached task and failures go to the operational log.

use crate::error::AppError;
use crate::models::{RequestContext, ToolName};
use crate::policy::PolicyDecision;
use crate::redact::redact_value;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

/// Everything captured about one tool invocation.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub ctx: RequestContext,
    pub tool: ToolName,
    pub inputs: Value,
    pub outputs: Value,
    pub decision: PolicyDecision,
    pub latency_ms: i64,
    pub row_count: i64,
    pub error: Option<String>,
}

/// One step of a replay timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStep {
    pub tool: String,
    pub decision: String,
    pub rule_ids: Vec<String>,
    pub latency_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Ordered reconstruction of all tool calls sharing one request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayTimeline {
    pub request_id: Uuid,
    pub steps: Vec<ReplayStep>,
    pub total_latency_ms: i64,
}

/// Filters for the dashboard-facing audit listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilters {
    pub user_id: Option<String>,
    pub tool: Option<String>,
    pub decision: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// A listed audit record (redacted payloads only).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListEntry {
    pub log_id: Uuid,
    pub request_id: Uuid,
    pub user_id: String,
    pub role: String,
    pub tool: String,
    pub inputs_redacted: Value,
    pub decision: String,
    pub rule_ids: Vec<String>,
    pub latency_ms: i64,
    pub row_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Build a replay timeline from fetched steps.
///
/// Ordering is creation-timestamp based, not insertion-sequence based:
/// concurrent tool calls for the same request id may interleave their
/// writes, so the rows are re-sorted here regardless of fetch order.
pub fn build_timeline(request_id: Uuid, mut steps: Vec<ReplayStep>) -> ReplayTimeline {
    steps.sort_by_key(|s| s.timestamp);
    let total_latency_ms = steps.iter().map(|s| s.latency_ms).sum();
    ReplayTimeline {
        request_id,
        steps,
        total_latency_ms,
    }
}

/// Recorder over the durable audit store.
#[derive(Clone)]
pub struct AuditRecorder {
    pool: Pool,
}

impl AuditRecorder {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Record a tool invocation without blocking the caller's response
    /// path. The write is spawned as its own task so it runs to completion
    /// even if the caller goes away; failures are logged for alerting and
    /// never propagated.
    pub fn record_detached(&self, entry: AuditEntry) {
        let recorder = self.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.record(&entry).await {
                error!(
                    request_id = %entry.ctx.request_id,
                    tool = %entry.tool,
                    error = %e,
                    "Failed to write audit log"
                );
            }
        });
    }

    /// Persist one audit record and emit the structured log event.
    ///
    /// The log line carries only the non-sensitive subset; raw and
    /// redacted payload bodies live in the durable store alone.
    pub async fn record(&self, entry: &AuditEntry) -> Result<(), AppError> {
        let inputs_redacted = redact_value(&entry.inputs);
        let outputs_redacted = redact_value(&entry.outputs);

        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO internal.audit_logs (
                    request_id, platform_user_id, user_role, tool_name,
                    tool_inputs, tool_inputs_redacted,
                    tool_outputs, tool_outputs_redacted,
                    policy_decision, policy_rule_ids, policy_constraints,
                    latency_ms, row_count, error_message
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                &[
                    &entry.ctx.request_id,
                    &entry.ctx.display_user_id,
                    &entry.ctx.role,
                    &entry.tool.as_str(),
                    &entry.inputs,
                    &inputs_redacted,
                    &entry.outputs,
                    &outputs_redacted,
                    &entry.decision.decision.as_str(),
                    &entry.decision.rule_ids,
                    &serde_json::to_value(&entry.decision.constraints)
                        .unwrap_or(Value::Null),
                    &entry.latency_ms,
                    &entry.row_count,
                    &entry.error,
                ],
            )
            .await?;

        info!(
            target: "audit",
            request_id = %entry.ctx.request_id,
            user_id = %entry.ctx.display_user_id,
            role = %entry.ctx.role,
            tool = %entry.tool,
            decision = entry.decision.decision.as_str(),
            rule_ids = ?entry.decision.rule_ids,
            latency_ms = entry.latency_ms,
            row_count = entry.row_count,
            error = entry.error.as_deref().unwrap_or(""),
            "tool_call"
        );

        Ok(())
    }

    /// Reconstruct the replay timeline for a request id.
    pub async fn replay(&self, request_id: Uuid) -> Result<ReplayTimeline, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT tool_name, policy_decision, policy_rule_ids, latency_ms, created_at
                 FROM internal.audit_logs
                 WHERE request_id = $1
                 ORDER BY created_at",
                &[&request_id],
            )
            .await?;

        if rows.is_empty() {
            return Err(AppError::NotFound(format!(
                "No audit records for request {}",
                request_id
            )));
        }

        let steps = rows
            .iter()
            .map(|row| ReplayStep {
                tool: row.get("tool_name"),
                decision: row.get("policy_decision"),
                rule_ids: row.get("policy_rule_ids"),
                latency_ms: row.get("latency_ms"),
                timestamp: row.get("created_at"),
            })
            .collect();

        Ok(build_timeline(request_id, steps))
    }

    /// List audit records for the dashboard boundary, newest first.
    pub async fn list(&self, filters: &AuditFilters) -> Result<Vec<AuditListEntry>, AppError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();

        if let Some(user_id) = &filters.user_id {
            params.push(user_id);
            conditions.push(format!("platform_user_id = ${}", params.len()));
        }
        if let Some(tool) = &filters.tool {
            params.push(tool);
            conditions.push(format!("tool_name = ${}", params.len()));
        }
        if let Some(decision) = &filters.decision {
            params.push(decision);
            conditions.push(format!("policy_decision = ${}", params.len()));
        }
        if let Some(since) = &filters.since {
            params.push(since);
            conditions.push(format!("created_at >= ${}", params.len()));
        }
        if let Some(until) = &filters.until {
            params.push(until);
            conditions.push(format!("created_at <= ${}", params.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let limit = filters.limit.unwrap_or(50).clamp(1, 500);

        let query = format!(
            "SELECT log_id, request_id, platform_user_id, user_role, tool_name,
                    tool_inputs_redacted, policy_decision, policy_rule_ids,
                    latency_ms, row_count, error_message, created_at
             FROM internal.audit_logs
             {}
             ORDER BY created_at DESC
             LIMIT {}",
            where_clause, limit
        );

        let client = self.pool.get().await?;
        let rows = client.query(&query, &params).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let inputs_redacted: Option<Value> = row.get("tool_inputs_redacted");
                AuditListEntry {
                    log_id: row.get("log_id"),
                    request_id: row.get("request_id"),
                    user_id: row.get("platform_user_id"),
                    role: row.get("user_role"),
                    tool: row.get("tool_name"),
                    inputs_redacted: inputs_redacted.unwrap_or(Value::Null),
                    decision: row.get("policy_decision"),
                    rule_ids: row.get("policy_rule_ids"),
                    latency_ms: row.get("latency_ms"),
                    row_count: row.get("row_count"),
                    error: row.get("error_message"),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn step(tool: &str, latency_ms: i64, ts_millis: i64) -> ReplayStep {
        ReplayStep {
            tool: tool.to_string(),
            decision: "ALLOW".to_string(),
            rule_ids: vec!["rbac.allow".to_string()],
            latency_ms,
            timestamp: Utc.timestamp_millis_opt(ts_millis).unwrap(),
        }
    }

    #[test]
    fn test_timeline_orders_by_creation_time() {
        let request_id = Uuid::new_v4();
        // Insertion order deliberately scrambled.
        let steps = vec![
            step("generate_chart", 40, 3_000),
            step("run_query", 120, 1_000),
            step("search_documents", 80, 2_000),
        ];

        let timeline = build_timeline(request_id, steps);

        let tools: Vec<&str> = timeline.steps.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(tools, vec!["run_query", "search_documents", "generate_chart"]);
    }

    #[test]
    fn test_timeline_total_latency() {
        let timeline = build_timeline(
            Uuid::new_v4(),
            vec![step("run_query", 120, 1), step("run_query", 30, 2)],
        );
        assert_eq!(timeline.total_latency_ms, 150);
    }

    #[test]
    fn test_timeline_empty_steps() {
        let timeline = build_timeline(Uuid::new_v4(), Vec::new());
        assert_eq!(timeline.total_latency_ms, 0);
        assert!(timeline.steps.is_empty());
    }
}
