//! Governed tool endpoints.
//!
//! Each endpoint builds the request context from caller-supplied fields
//! and hands the action to the governed executor. Decisions (deny,
//! approval pending, allow) travel inside the tool result payload, not as
//! HTTP errors.

use crate::error::{ApiResult, AppError};
use crate::executor::{ChartRequest, ToolResponse};
use crate::models::*;
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Principal fields every tool request carries.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Principal {
    #[validate(length(min = 1, max = 255))]
    pub user_id: String,
    #[validate(length(min = 1, max = 255))]
    pub display_user_id: String,
    #[validate(length(min = 1, max = 64))]
    pub role: String,
    pub region: Option<String>,
    pub request_id: Option<Uuid>,
}

impl Principal {
    fn into_context(self) -> RequestContext {
        RequestContext::new(
            self.request_id,
            self.user_id,
            self.display_user_id,
            self.role,
            self.region,
        )
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RunQueryRequest {
    #[validate(length(min = 1, max = 20000))]
    pub query: String,
    #[serde(flatten)]
    #[validate(nested)]
    pub principal: Principal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchDocumentsRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,
    #[validate(range(min = 1, max = 50))]
    pub top_k: Option<i64>,
    #[serde(flatten)]
    #[validate(nested)]
    pub principal: Principal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExplainMetricRequest {
    #[validate(length(min = 1, max = 255))]
    pub metric_name: String,
    #[serde(flatten)]
    #[validate(nested)]
    pub principal: Principal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateChartRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub chart: ChartRequest,
    #[serde(flatten)]
    #[validate(nested)]
    pub principal: Principal,
}

fn validated<T: Validate>(request: &T) -> Result<(), AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}

/// POST /api/run_query
pub async fn run_query(
    State(state): State<SharedState>,
    Json(request): Json<RunQueryRequest>,
) -> ApiResult<Json<QueryResult>> {
    validated(&request)?;
    let ctx = request.principal.into_context();
    let result = state.executor.run_query(&ctx, &request.query).await;
    Ok(Json(result))
}

/// POST /api/search_documents
pub async fn search_documents(
    State(state): State<SharedState>,
    Json(request): Json<SearchDocumentsRequest>,
) -> ApiResult<Json<ToolResponse<Vec<DocResult>>>> {
    validated(&request)?;
    let top_k = request.top_k.unwrap_or(5);
    let ctx = request.principal.into_context();
    let result = state
        .executor
        .search_documents(&ctx, &request.query, top_k)
        .await;
    Ok(Json(result))
}

/// POST /api/explain_metric
pub async fn explain_metric(
    State(state): State<SharedState>,
    Json(request): Json<ExplainMetricRequest>,
) -> ApiResult<Json<ToolResponse<MetricDefinition>>> {
    validated(&request)?;
    let ctx = request.principal.into_context();
    let result = state
        .executor
        .explain_metric(&ctx, &request.metric_name)
        .await;
    Ok(Json(result))
}

/// POST /api/generate_chart
pub async fn generate_chart(
    State(state): State<SharedState>,
    Json(request): Json<GenerateChartRequest>,
) -> ApiResult<Json<ToolResponse<ChartSpec>>> {
    validated(&request)?;
    let ctx = request.principal.into_context();
    let result = state.executor.generate_chart(&ctx, &request.chart).await;
    Ok(Json(result))
}
