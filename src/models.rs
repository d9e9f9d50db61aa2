//! Domain models shared across the governed execution pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifies the principal and request for one user turn.
///
/// Immutable once created; the same `request_id` is carried by every tool
/// call the caller issues within a single turn, which is what ties the
/// audit records together into a replay timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub user_id: String,
    /// Platform-specific handle (e.g. the chat workspace user id).
    pub display_user_id: String,
    pub role: String,
    pub region: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RequestContext {
    /// Build a context from caller-supplied fields, generating a fresh
    /// request id when the caller did not supply one.
    pub fn new(
        request_id: Option<Uuid>,
        user_id: String,
        display_user_id: String,
        role: String,
        region: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.unwrap_or_else(Uuid::new_v4),
            user_id,
            display_user_id,
            role,
            region,
            timestamp: Utc::now(),
        }
    }

    /// Roles allowed to see raw query previews in results.
    pub fn can_see_query_preview(&self) -> bool {
        matches!(self.role.as_str(), "data_analyst" | "admin")
    }
}

/// The governed tools this gateway mediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    RunQuery,
    SearchDocuments,
    ExplainMetric,
    GenerateChart,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::RunQuery => "run_query",
            ToolName::SearchDocuments => "search_documents",
            ToolName::ExplainMetric => "explain_metric",
            ToolName::GenerateChart => "generate_chart",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a governed SQL execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,
    pub data: Vec<Value>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub query_id: String,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_preview: Option<String>,
    pub requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn failure(query_id: String, latency_ms: i64, error: String) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            query_id,
            latency_ms,
            query_preview: None,
            requires_approval: false,
            error: Some(error),
        }
    }
}

/// One document search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocResult {
    pub doc_id: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub metadata: Value,
}

/// A metric definition from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_template: Option<String>,
    pub dimensions: Vec<String>,
    pub tags: Vec<String>,
}

/// A generated chart specification (Vega-Lite v5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub chart_type: String,
    pub title: String,
    pub vega_lite_spec: Value,
    pub data_hash: String,
}
