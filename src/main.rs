//! QueryGate API - Governed Tool Execution Gateway
//!
//! Mediates every data-access action an automated assistant takes on
//! behalf of a user: classify the action, evaluate it against the external
//! policy decision point, branch on the decision (deny / require human
//! approval / allow with constraints), execute under those constraints,
//! and durably record a redacted, replayable audit trail.

mod approval;
mod audit;
mod classifier;
mod config;
mod error;
mod executor;
mod models;
mod policy;
mod redact;
mod routes;
mod state;

use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting QueryGate - Governed Tool Execution Gateway...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded (policy decision point: {})", settings.policy.url);

    // Initialize database pool - REQUIRED (the audit trail has no fallback)
    let pool = match init_database_pool().await {
        Ok(pool) => {
            info!("✅ Database pool created successfully");

            if let Err(e) = create_internal_tables(&pool).await {
                warn!("⚠️  Warning creating internal tables: {}", e);
            }

            pool
        }
        Err(e) => {
            error!("❌ FATAL: Failed to initialize database pool: {}", e);
            error!("DATABASE_URL must be set in .env and database must be accessible");
            panic!("Cannot start server without database connection");
        }
    };

    let state = Arc::new(AppState::new(pool, &settings)?);

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Governed Tools ───");
    info!("   POST /api/run_query            - Execute SQL under policy");
    info!("   POST /api/search_documents     - Search documents (ACL filtered)");
    info!("   POST /api/explain_metric       - Look up metric definitions");
    info!("   POST /api/generate_chart       - Build Vega-Lite chart specs");
    info!("");
    info!("   ─── Audit & Approvals ───");
    info!("   GET  /api/replay/:request_id   - Replay timeline for a request");
    info!("   GET  /api/audit                - List audit records (filtered)");
    info!("   GET  /api/approvals            - List approval requests");
    info!("   POST /api/approvals/callback   - Resolve a pending approval");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,querygate_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Initialize database pool from DATABASE_URL
async fn init_database_pool() -> anyhow::Result<deadpool_postgres::Pool> {
    // Load .env file first
    let _ = dotenvy::dotenv();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL not set in environment or .env file"))?;

    // Parse the DATABASE_URL using tokio_postgres::Config
    let config = database_url
        .parse::<tokio_postgres::Config>()
        .map_err(|e| anyhow::anyhow!("Failed to parse DATABASE_URL: {}", e))?;

    // Extract connection parameters from parsed config
    let hosts = config.get_hosts();
    let host_str = if !hosts.is_empty() {
        match &hosts[0] {
            tokio_postgres::config::Host::Tcp(s) => s.clone(),
            tokio_postgres::config::Host::Unix(_) => {
                return Err(anyhow::anyhow!("Unix socket connections are not supported"));
            }
        }
    } else {
        return Err(anyhow::anyhow!("No host in DATABASE_URL"));
    };

    let ports = config.get_ports();
    let port = if !ports.is_empty() { ports[0] } else { 5432 };

    let user = config
        .get_user()
        .map(|u| u.to_string())
        .ok_or_else(|| anyhow::anyhow!("No user in DATABASE_URL"))?;

    let password = config
        .get_password()
        .map(|p| String::from_utf8_lossy(p).to_string())
        .unwrap_or_default();

    let database = config
        .get_dbname()
        .map(|db| db.to_string())
        .ok_or_else(|| anyhow::anyhow!("No database name in DATABASE_URL"))?;

    // Managed Postgres providers typically require TLS
    let use_tls = database_url.contains("sslmode=require");

    // Create deadpool config
    use deadpool_postgres::{Config, ManagerConfig, RecyclingMethod};

    let mut cfg = Config::new();
    cfg.host = Some(host_str.clone());
    cfg.port = Some(port);
    cfg.user = Some(user);
    cfg.password = Some(password);
    cfg.dbname = Some(database);
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    // Create pool with TLS support if needed
    let pool = if use_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    // Test the connection
    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;

    let _row = client
        .query_one("SELECT 1 as ok", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?;

    info!("✅ Database connection successful (TLS: {})", use_tls);
    Ok(pool)
}

/// Create internal governance tables if they don't exist
async fn create_internal_tables(pool: &deadpool_postgres::Pool) -> anyhow::Result<()> {
    let client = pool.get().await?;

    client
        .execute("CREATE SCHEMA IF NOT EXISTS internal", &[])
        .await?;

    // Append-only audit log. clock_timestamp() rather than now() so that
    // records created inside one transaction still order correctly.
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS internal.audit_logs (
                log_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                request_id UUID NOT NULL,
                platform_user_id TEXT NOT NULL,
                user_role TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                tool_inputs JSONB,
                tool_inputs_redacted JSONB,
                tool_outputs JSONB,
                tool_outputs_redacted JSONB,
                policy_decision TEXT NOT NULL,
                policy_rule_ids TEXT[] NOT NULL DEFAULT '{}',
                policy_constraints JSONB,
                latency_ms BIGINT NOT NULL DEFAULT 0,
                row_count BIGINT NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
            )",
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS internal.approval_requests (
                approval_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                request_id UUID NOT NULL,
                platform_user_id TEXT NOT NULL,
                user_role TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                tool_inputs JSONB,
                reason TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'denied')),
                approver_id TEXT,
                approver_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                decided_at TIMESTAMPTZ
            )",
            &[],
        )
        .await?;

    // Indexes for replay and dashboard queries
    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_request_id
             ON internal.audit_logs(request_id, created_at)",
            &[],
        )
        .await;
    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at
             ON internal.audit_logs(created_at DESC)",
            &[],
        )
        .await;
    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_approval_requests_request_id
             ON internal.approval_requests(request_id)",
            &[],
        )
        .await;
    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_approval_requests_status
             ON internal.approval_requests(status, created_at DESC)",
            &[],
        )
        .await;

    info!("✅ Internal governance tables initialized");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
