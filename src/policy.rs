//! Policy decision point client
//!
//! Single synchronous round trip to the external decision service. This is
//! the only authorization choke point in the system and it is fail-closed:
//! any transport error, timeout, or malformed response is a DENY. No
//! component may grant access on its own.

use crate::classifier::{ActionDescriptor, ActionKind, TableRef};
use crate::models::{RequestContext, ToolName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::error;

/// Reserved rule id stamped on the built-in fail-closed denial. This is the
/// only case where a decision may carry a single synthetic rule id.
pub const RULE_POLICY_UNAVAILABLE: &str = "error.policy_unavailable";

/// Default bound on the decision round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of evaluating a request context + action descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    RequireApproval,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
            Decision::RequireApproval => "REQUIRE_APPROVAL",
        }
    }
}

/// Execution constraints attached to an ALLOW decision.
///
/// Modeled as a closed struct rather than an open mapping so the masking
/// and limit-injection logic stays statically checkable. Unknown keys from
/// the decision point are ignored on deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_columns: Vec<String>,
}

/// A policy decision, created once per tool call and attached 1:1 to the
/// resulting audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    #[serde(default)]
    pub rule_ids: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub constraints: Constraints,
}

impl PolicyDecision {
    /// The built-in fail-closed denial. The reason is deliberately generic:
    /// the caller must not learn why the decision point failed.
    pub fn fail_closed() -> Self {
        Self {
            decision: Decision::Deny,
            rule_ids: vec![RULE_POLICY_UNAVAILABLE.to_string()],
            reason: Some("Policy service unavailable".to_string()),
            constraints: Constraints::default(),
        }
    }

    pub fn reason_or_default(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "Access denied".to_string())
    }
}

/// Wire request for the decision point.
#[derive(Debug, Serialize)]
struct PolicyInput<'a> {
    user_id: &'a str,
    role: &'a str,
    region: Option<&'a str>,
    tool: &'a str,
    tables: &'a [TableRef],
    query_type: &'a str,
    has_limit: bool,
    metadata: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PolicyResponse {
    #[serde(default)]
    result: Option<PolicyDecision>,
}

/// Source of policy decisions for the governed executor. Production code
/// uses [`PolicyClient`]; tests substitute fixed decisions to drive the
/// executor down each enforcement branch.
#[async_trait]
pub trait DecisionPoint: Send + Sync {
    /// Evaluate policy for one tool call. Fail-closed on any error: the
    /// system must never default to ALLOW when the decision point cannot
    /// be reached. Retries, if desired, belong to the caller; evaluation
    /// has no side effects so a retry is always safe.
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        descriptor: &ActionDescriptor,
        tool: ToolName,
    ) -> PolicyDecision;
}

/// Client for the external policy decision point.
pub struct PolicyClient {
    base_url: String,
    client: reqwest::Client,
}

impl PolicyClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl DecisionPoint for PolicyClient {
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        descriptor: &ActionDescriptor,
        tool: ToolName,
    ) -> PolicyDecision {
        let query_type = match descriptor.action_kind {
            ActionKind::Select => "SELECT",
            ActionKind::Ddl => "DDL",
            ActionKind::Dml => "DML",
        };

        let input = PolicyInput {
            user_id: &ctx.user_id,
            role: &ctx.role,
            region: ctx.region.as_deref(),
            tool: tool.as_str(),
            tables: &descriptor.targets,
            query_type,
            // Aggregate queries are implicitly bounded, so they count as
            // limited for policy purposes.
            has_limit: descriptor.has_row_limit || descriptor.is_aggregate,
            metadata: HashMap::new(),
        };

        let url = format!("{}/v1/data/analyst/main", self.base_url);
        let response = match self
            .client
            .post(&url)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, request_id = %ctx.request_id, "Policy request failed");
                return PolicyDecision::fail_closed();
            }
        };

        if !response.status().is_success() {
            error!(
                status = %response.status(),
                request_id = %ctx.request_id,
                "Policy decision point returned non-success status"
            );
            return PolicyDecision::fail_closed();
        }

        match response.json::<PolicyResponse>().await {
            Ok(PolicyResponse {
                result: Some(decision),
            }) => decision,
            Ok(PolicyResponse { result: None }) => {
                error!(request_id = %ctx.request_id, "Policy response missing result");
                PolicyDecision::fail_closed()
            }
            Err(e) => {
                error!(error = %e, request_id = %ctx.request_id, "Malformed policy response");
                PolicyDecision::fail_closed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier;
    use pretty_assertions::assert_eq;

    fn test_context() -> RequestContext {
        RequestContext::new(
            None,
            "user-1".to_string(),
            "U123".to_string(),
            "intern".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn test_fail_closed_on_unreachable_decision_point() {
        // Port 1 is never listening; the connection is refused immediately.
        let client = PolicyClient::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(500),
        )
        .unwrap();
        let descriptor = classifier::analyze("SELECT * FROM reporting.daily_kpis");

        let decision = client
            .evaluate(&test_context(), &descriptor, ToolName::RunQuery)
            .await;

        assert_eq!(decision.decision, Decision::Deny);
        assert_eq!(decision.rule_ids, vec![RULE_POLICY_UNAVAILABLE.to_string()]);
    }

    #[test]
    fn test_decision_wire_format() {
        let parsed: PolicyDecision = serde_json::from_value(serde_json::json!({
            "decision": "REQUIRE_APPROVAL",
            "rule_ids": ["pii.customer_contact"],
            "reason": "Accessing customer contact data requires approval",
            "constraints": {"max_rows": 100, "masked_columns": ["email"], "unknown": 1}
        }))
        .unwrap();

        assert_eq!(parsed.decision, Decision::RequireApproval);
        assert_eq!(parsed.constraints.max_rows, Some(100));
        assert_eq!(parsed.constraints.masked_columns, vec!["email".to_string()]);
    }

    #[test]
    fn test_decision_defaults() {
        let parsed: PolicyDecision =
            serde_json::from_value(serde_json::json!({"decision": "ALLOW"})).unwrap();

        assert_eq!(parsed.decision, Decision::Allow);
        assert!(parsed.rule_ids.is_empty());
        assert_eq!(parsed.constraints, Constraints::default());
    }

    #[test]
    fn test_fail_closed_reason_is_generic() {
        let decision = PolicyDecision::fail_closed();
        assert_eq!(decision.reason_or_default(), "Policy service unavailable");
        assert_eq!(decision.decision.as_str(), "DENY");
    }
}
