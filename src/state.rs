//! Application state management
//!
//! Shared state accessible across all handlers. Clients are explicitly
//! constructed and owned here at startup, never module-level singletons.

use crate::approval::ApprovalStore;
use crate::audit::AuditRecorder;
use crate::config::Settings;
use crate::executor::GovernedExecutor;
use crate::policy::PolicyClient;
use deadpool_postgres::Pool;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
pub struct AppState {
    /// Database connection pool (warehouse + internal stores)
    pub db_pool: Pool,

    /// Governed executor wrapping every tool invocation
    pub executor: GovernedExecutor,

    /// Audit recorder, also exposed directly for replay and listing
    pub audit: AuditRecorder,

    /// Approval request store for the resolve/list boundary
    pub approvals: ApprovalStore,
}

impl AppState {
    /// Create the application state from a pool and settings. Fails when
    /// the policy HTTP client cannot be constructed, which must abort
    /// startup rather than leave the service without a decision point.
    pub fn new(pool: Pool, settings: &Settings) -> anyhow::Result<Self> {
        let policy = Arc::new(
            PolicyClient::new(
                settings.policy.url.clone(),
                Duration::from_secs(settings.policy.timeout_secs),
            )
            .map_err(|e| anyhow::anyhow!("Failed to build policy client: {}", e))?,
        );
        let audit = AuditRecorder::new(pool.clone());
        let approvals = ApprovalStore::new(pool.clone());
        let executor = GovernedExecutor::new(
            pool.clone(),
            policy,
            audit.clone(),
            approvals.clone(),
            settings.execution.default_max_rows,
        );

        Ok(Self {
            db_pool: pool,
            executor,
            audit,
            approvals,
        })
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
