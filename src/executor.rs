//! Governed executor
//!
//! The orchestrator wrapping every tool invocation: classify the action,
//! evaluate policy, branch on the decision, execute under constraints,
//! and record the audit trail. Per-call state machine:
//! CLASSIFIED -> EVALUATED -> {DENIED | PENDING_APPROVAL |
//! EXECUTING -> {SUCCEEDED | EXECUTION_FAILED}}. A retry by the caller is
//! a brand-new call.

pub mod chart;
pub mod docs;
pub mod metrics;
pub mod sql;

use crate::audit::{AuditEntry, AuditRecorder};
use crate::approval::ApprovalStore;
use crate::classifier::{self, ActionDescriptor};
use crate::models::*;
use crate::policy::{Decision, DecisionPoint, PolicyDecision};
use deadpool_postgres::Pool;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use uuid::Uuid;

pub use chart::ChartRequest;

/// Response wrapper for non-query tools, mirroring the deny / pending /
/// result branches of the per-call contract.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse<T> {
    pub success: bool,
    pub requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> ToolResponse<T> {
    fn denied(reason: String) -> Self {
        Self {
            success: false,
            requires_approval: false,
            error: Some(format!("Access denied: {}", reason)),
            result: None,
        }
    }

    fn pending_approval(reason: String) -> Self {
        Self {
            success: false,
            requires_approval: true,
            error: Some(format!("Approval required: {}", reason)),
            result: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            requires_approval: false,
            error: Some(error),
            result: None,
        }
    }

    fn ok(result: T) -> Self {
        Self {
            success: true,
            requires_approval: false,
            error: None,
            result: Some(result),
        }
    }
}

/// Orchestrates governed execution of every tool. Owns its collaborators;
/// constructed once at startup and shared through the application state.
pub struct GovernedExecutor {
    warehouse: Pool,
    policy: Arc<dyn DecisionPoint>,
    audit: AuditRecorder,
    approvals: ApprovalStore,
    default_max_rows: i64,
}

impl GovernedExecutor {
    pub fn new(
        warehouse: Pool,
        policy: Arc<dyn DecisionPoint>,
        audit: AuditRecorder,
        approvals: ApprovalStore,
        default_max_rows: i64,
    ) -> Self {
        Self {
            warehouse,
            policy,
            audit,
            approvals,
            default_max_rows,
        }
    }

    /// Execute a SQL query under full governance.
    pub async fn run_query(&self, ctx: &RequestContext, query: &str) -> QueryResult {
        let start = Instant::now();
        let query_id = short_id();
        let descriptor = classifier::analyze(query);
        let decision = self
            .policy
            .evaluate(ctx, &descriptor, ToolName::RunQuery)
            .await;

        let inputs = json!({ "query": truncate(query, 500) });

        match decision.decision {
            Decision::Deny => {
                let reason = decision.reason_or_default();
                self.record(
                    ctx,
                    ToolName::RunQuery,
                    inputs,
                    json!({ "error": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    Some(reason.clone()),
                );
                QueryResult::failure(
                    query_id,
                    elapsed_ms(start),
                    format!("Access denied: {}", reason),
                )
            }
            Decision::RequireApproval => {
                let reason = decision.reason_or_default();
                self.create_approval(ctx, ToolName::RunQuery, &inputs, &reason)
                    .await;
                self.record(
                    ctx,
                    ToolName::RunQuery,
                    inputs,
                    json!({ "requires_approval": true, "reason": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    None,
                );
                let mut result = QueryResult::failure(
                    query_id,
                    elapsed_ms(start),
                    format!("Approval required: {}", reason),
                );
                result.requires_approval = true;
                result
            }
            Decision::Allow => {
                self.execute_allowed_query(ctx, query, query_id, &descriptor, &decision, inputs, start)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_allowed_query(
        &self,
        ctx: &RequestContext,
        query: &str,
        query_id: String,
        descriptor: &ActionDescriptor,
        decision: &PolicyDecision,
        inputs: Value,
        start: Instant,
    ) -> QueryResult {
        let max_rows = decision.constraints.max_rows.unwrap_or(self.default_max_rows);
        let exec_query = sql::inject_limit(query, descriptor, max_rows);

        match sql::execute(&self.warehouse, ctx, &exec_query).await {
            Ok((raw_rows, columns)) => {
                // Policy-constraint masking is applied to the returned data
                // only; the raw rows go to the audit record untouched.
                let mut data = raw_rows.clone();
                sql::mask_rows(&mut data, &decision.constraints.masked_columns);

                let latency_ms = elapsed_ms(start);
                let row_count = data.len();
                self.record(
                    ctx,
                    ToolName::RunQuery,
                    inputs,
                    json!({ "row_count": row_count, "columns": columns, "rows": raw_rows }),
                    decision,
                    latency_ms,
                    row_count as i64,
                    None,
                );

                QueryResult {
                    success: true,
                    data,
                    columns,
                    row_count,
                    query_id,
                    latency_ms,
                    query_preview: ctx
                        .can_see_query_preview()
                        .then(|| truncate(query, 200)),
                    requires_approval: false,
                    error: None,
                }
            }
            Err(e) => {
                // Execution failed after an ALLOW: the decision stands,
                // the error is a separate failure class.
                let error_msg = e.to_string();
                let latency_ms = elapsed_ms(start);
                self.record(
                    ctx,
                    ToolName::RunQuery,
                    inputs,
                    json!({ "error": error_msg }),
                    decision,
                    latency_ms,
                    0,
                    Some(error_msg.clone()),
                );
                QueryResult::failure(query_id, latency_ms, error_msg)
            }
        }
    }

    /// Search internal documents with role-based ACL filtering.
    pub async fn search_documents(
        &self,
        ctx: &RequestContext,
        query: &str,
        top_k: i64,
    ) -> ToolResponse<Vec<DocResult>> {
        let start = Instant::now();
        let descriptor = ActionDescriptor::default();
        let decision = self
            .policy
            .evaluate(ctx, &descriptor, ToolName::SearchDocuments)
            .await;

        let inputs = json!({ "query": query, "top_k": top_k });

        match decision.decision {
            Decision::Deny => {
                let reason = decision.reason_or_default();
                self.record(
                    ctx,
                    ToolName::SearchDocuments,
                    inputs,
                    json!({ "error": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    Some(reason.clone()),
                );
                ToolResponse::denied(reason)
            }
            Decision::RequireApproval => {
                let reason = decision.reason_or_default();
                self.create_approval(ctx, ToolName::SearchDocuments, &inputs, &reason)
                    .await;
                self.record(
                    ctx,
                    ToolName::SearchDocuments,
                    inputs,
                    json!({ "requires_approval": true, "reason": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    None,
                );
                ToolResponse::pending_approval(reason)
            }
            Decision::Allow => match docs::search(&self.warehouse, &ctx.role, query, top_k).await {
                Ok(results) => {
                    self.record(
                        ctx,
                        ToolName::SearchDocuments,
                        inputs,
                        json!({ "result_count": results.len() }),
                        &decision,
                        elapsed_ms(start),
                        results.len() as i64,
                        None,
                    );
                    ToolResponse::ok(results)
                }
                Err(e) => {
                    let error_msg = e.to_string();
                    self.record(
                        ctx,
                        ToolName::SearchDocuments,
                        inputs,
                        json!({ "error": error_msg }),
                        &decision,
                        elapsed_ms(start),
                        0,
                        Some(error_msg.clone()),
                    );
                    ToolResponse::failed(error_msg)
                }
            },
        }
    }

    /// Look up a metric definition from the registry.
    pub async fn explain_metric(
        &self,
        ctx: &RequestContext,
        metric_name: &str,
    ) -> ToolResponse<MetricDefinition> {
        let start = Instant::now();
        let descriptor = ActionDescriptor::default();
        let decision = self
            .policy
            .evaluate(ctx, &descriptor, ToolName::ExplainMetric)
            .await;

        let inputs = json!({ "metric_name": metric_name });

        match decision.decision {
            Decision::Deny => {
                let reason = decision.reason_or_default();
                self.record(
                    ctx,
                    ToolName::ExplainMetric,
                    inputs,
                    json!({ "error": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    Some(reason.clone()),
                );
                ToolResponse::denied(reason)
            }
            Decision::RequireApproval => {
                let reason = decision.reason_or_default();
                self.create_approval(ctx, ToolName::ExplainMetric, &inputs, &reason)
                    .await;
                self.record(
                    ctx,
                    ToolName::ExplainMetric,
                    inputs,
                    json!({ "requires_approval": true, "reason": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    None,
                );
                ToolResponse::pending_approval(reason)
            }
            Decision::Allow => match metrics::lookup(&self.warehouse, metric_name).await {
                Ok(Some(metric)) => {
                    self.record(
                        ctx,
                        ToolName::ExplainMetric,
                        inputs,
                        json!({ "found": true, "metric": metric.name }),
                        &decision,
                        elapsed_ms(start),
                        1,
                        None,
                    );
                    ToolResponse::ok(metric)
                }
                Ok(None) => {
                    self.record(
                        ctx,
                        ToolName::ExplainMetric,
                        inputs,
                        json!({ "found": false }),
                        &decision,
                        elapsed_ms(start),
                        0,
                        None,
                    );
                    ToolResponse::failed(format!("Metric '{}' not found", metric_name))
                }
                Err(e) => {
                    let error_msg = e.to_string();
                    self.record(
                        ctx,
                        ToolName::ExplainMetric,
                        inputs,
                        json!({ "error": error_msg }),
                        &decision,
                        elapsed_ms(start),
                        0,
                        Some(error_msg.clone()),
                    );
                    ToolResponse::failed(error_msg)
                }
            },
        }
    }

    /// Generate a Vega-Lite chart specification from data.
    pub async fn generate_chart(
        &self,
        ctx: &RequestContext,
        request: &ChartRequest,
    ) -> ToolResponse<ChartSpec> {
        let start = Instant::now();
        let descriptor = ActionDescriptor::default();
        let decision = self
            .policy
            .evaluate(ctx, &descriptor, ToolName::GenerateChart)
            .await;

        let inputs = json!({
            "chart_type": request.chart_type,
            "title": request.title,
            "data_points": request.data.len(),
        });

        match decision.decision {
            Decision::Deny => {
                let reason = decision.reason_or_default();
                self.record(
                    ctx,
                    ToolName::GenerateChart,
                    inputs,
                    json!({ "error": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    Some(reason.clone()),
                );
                ToolResponse::denied(reason)
            }
            Decision::RequireApproval => {
                let reason = decision.reason_or_default();
                self.create_approval(ctx, ToolName::GenerateChart, &inputs, &reason)
                    .await;
                self.record(
                    ctx,
                    ToolName::GenerateChart,
                    inputs,
                    json!({ "requires_approval": true, "reason": reason }),
                    &decision,
                    elapsed_ms(start),
                    0,
                    None,
                );
                ToolResponse::pending_approval(reason)
            }
            Decision::Allow => {
                // Chart building is local and infallible by construction.
                let spec = chart::build_spec(request);
                self.record(
                    ctx,
                    ToolName::GenerateChart,
                    inputs,
                    json!({ "data_hash": spec.data_hash }),
                    &decision,
                    elapsed_ms(start),
                    request.data.len() as i64,
                    None,
                );
                ToolResponse::ok(spec)
            }
        }
    }

    async fn create_approval(
        &self,
        ctx: &RequestContext,
        tool: ToolName,
        inputs: &Value,
        reason: &str,
    ) {
        if let Err(e) = self.approvals.create(ctx, tool, inputs, reason).await {
            // The gate itself already holds (nothing executes); losing the
            // tracking row only breaks later resolution, so log for
            // alerting instead of failing the response.
            error!(
                request_id = %ctx.request_id,
                tool = %tool,
                error = %e,
                "Failed to persist approval request"
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &RequestContext,
        tool: ToolName,
        inputs: Value,
        outputs: Value,
        decision: &PolicyDecision,
        latency_ms: i64,
        row_count: i64,
        error: Option<String>,
    ) {
        self.audit.record_detached(AuditEntry {
            ctx: ctx.clone(),
            tool,
            inputs,
            outputs,
            decision: decision.clone(),
            latency_ms,
            row_count,
            error,
        });
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Constraints;
    use async_trait::async_trait;
    use deadpool_postgres::Runtime;
    use pretty_assertions::assert_eq;

    /// Decision source returning the same decision for every call.
    struct FixedDecision(PolicyDecision);

    #[async_trait]
    impl DecisionPoint for FixedDecision {
        async fn evaluate(
            &self,
            _ctx: &RequestContext,
            _descriptor: &ActionDescriptor,
            _tool: ToolName,
        ) -> PolicyDecision {
            self.0.clone()
        }
    }

    // Pool aimed at a port nothing listens on. Connections are only
    // attempted on get(), so any code path that touches the warehouse
    // surfaces a connection error instead of the governance outcome.
    fn dead_pool() -> Pool {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = Some("127.0.0.1".to_string());
        cfg.port = Some(1);
        cfg.user = Some("nobody".to_string());
        cfg.password = Some("unused".to_string());
        cfg.dbname = Some("unused".to_string());
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .unwrap()
    }

    fn executor_with(decision: PolicyDecision) -> GovernedExecutor {
        let pool = dead_pool();
        GovernedExecutor::new(
            pool.clone(),
            Arc::new(FixedDecision(decision)),
            AuditRecorder::new(pool.clone()),
            ApprovalStore::new(pool),
            100,
        )
    }

    fn test_context() -> RequestContext {
        RequestContext::new(
            None,
            "user-1".to_string(),
            "U123".to_string(),
            "intern".to_string(),
            None,
        )
    }

    fn decision_of(decision: Decision, reason: &str) -> PolicyDecision {
        PolicyDecision {
            decision,
            rule_ids: vec!["rbac.intern_restrictions".to_string()],
            reason: Some(reason.to_string()),
            constraints: Constraints::default(),
        }
    }

    #[tokio::test]
    async fn test_denied_query_never_reaches_warehouse() {
        let executor = executor_with(decision_of(Decision::Deny, "interns may not query finance"));

        let result = executor
            .run_query(&test_context(), "SELECT * FROM finance.salaries")
            .await;

        assert!(!result.success);
        assert!(!result.requires_approval);
        assert!(result.data.is_empty());
        // The warehouse is unreachable, so an attempted execution would
        // have surfaced a connection error rather than the policy reason.
        assert_eq!(
            result.error.as_deref(),
            Some("Access denied: interns may not query finance")
        );
    }

    #[tokio::test]
    async fn test_approval_required_skips_execution() {
        let executor =
            executor_with(decision_of(Decision::RequireApproval, "customer contact data"));

        let result = executor
            .run_query(&test_context(), "SELECT email FROM crm.contacts")
            .await;

        assert!(result.requires_approval);
        assert!(!result.success);
        assert!(result.data.is_empty());
        assert_eq!(
            result.error.as_deref(),
            Some("Approval required: customer contact data")
        );
    }

    #[tokio::test]
    async fn test_allowed_query_attempts_execution() {
        let executor = executor_with(decision_of(Decision::Allow, "ok"));

        let result = executor
            .run_query(&test_context(), "SELECT 1")
            .await;

        // Allowed calls do reach the warehouse; here that means a
        // connection failure, reported as an execution error and not as
        // a denial or a pending approval.
        assert!(!result.success);
        assert!(!result.requires_approval);
        let error = result.error.unwrap();
        assert!(!error.starts_with("Access denied"));
        assert!(!error.starts_with("Approval required"));
    }

    #[tokio::test]
    async fn test_denied_search_carries_reason() {
        let executor = executor_with(decision_of(Decision::Deny, "documents are off limits"));

        let response = executor
            .search_documents(&test_context(), "pricing strategy", 5)
            .await;

        assert!(!response.success);
        assert!(response.result.is_none());
        assert_eq!(
            response.error.as_deref(),
            Some("Access denied: documents are off limits")
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 500), "ab");
    }

    #[test]
    fn test_short_id_length() {
        assert_eq!(short_id().len(), 8);
    }

    #[test]
    fn test_tool_response_branches() {
        let denied: ToolResponse<()> = ToolResponse::denied("no access".to_string());
        assert!(!denied.success);
        assert!(!denied.requires_approval);
        assert_eq!(denied.error.as_deref(), Some("Access denied: no access"));

        let pending: ToolResponse<()> = ToolResponse::pending_approval("pii".to_string());
        assert!(pending.requires_approval);
        assert!(!pending.success);

        let ok = ToolResponse::ok(42);
        assert!(ok.success);
        assert_eq!(ok.result, Some(42));
    }
}
