use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use conclave::bootstrap::wire_supervisors;
use conclave::infrastructure::config::ConfigLoader;
use conclave::infrastructure::logging;
use conclave::services::agent_registry::{AgentRegistry, AgentRegistryConfig};
use conclave::services::audit_log::{AuditLogConfig, AuditLogService};
use conclave::services::message_bus::{BusConfig, MessageBus};
use conclave::services::orchestrator::{NoopClassifier, Orchestrator, OrchestratorConfig};
use conclave::services::provider_pool::{ProviderConfig, ProviderPool};
use conclave::services::session_layer::{SessionConfig, SessionLayer};
use conclave_gateway::auth::StaticTokenVerifier;
use conclave_gateway::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "conclave-gateway", version, about = "Network transport for the Conclave orchestrator")]
struct Cli {
    #[arg(long, env = "CONCLAVE_GATEWAY_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Bootstrap bearer token resolving to the "admin" principal. A real
    /// deployment wires a persistent token table or an external identity
    /// provider in behind the same `IdentityVerifier` port instead.
    #[arg(long, env = "CONCLAVE_GATEWAY_BOOTSTRAP_TOKEN", default_value = "dev-token")]
    bootstrap_token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let project_root = std::env::current_dir().context("resolving project root")?;
    let config = ConfigLoader::new(&project_root).load().context("loading configuration")?;
    let _logger_guard = logging::init(&config.logging);

    let registry = Arc::new(AgentRegistry::new(AgentRegistryConfig::default()));
    let bus = Arc::new(MessageBus::new(BusConfig { mailbox_capacity: config.bus.mailbox_capacity }));
    let audit = Arc::new(AuditLogService::new(AuditLogConfig::default()));
    let provider_pool = Arc::new(ProviderPool::new());

    let mut provider_ids = Vec::with_capacity(config.providers.len());
    for provider in &config.providers {
        provider_ids.push(provider.id.clone());
        provider_pool
            .configure(
                provider.id.clone(),
                ProviderConfig {
                    requests_per_window: provider.requests_per_window,
                    tokens_per_window: provider.tokens_per_window,
                    max_concurrent: provider.max_concurrent,
                    window_duration: chrono::Duration::seconds(provider.window_duration_secs as i64),
                    retry_max_attempts: provider.retry_max_attempts,
                    retry_initial_backoff: std::time::Duration::from_millis(provider.retry_initial_backoff_ms),
                    retry_max_backoff: std::time::Duration::from_millis(provider.retry_max_backoff_ms),
                    ..ProviderConfig::default()
                },
                chrono::Utc::now(),
            )
            .await;
    }
    provider_pool.clone().spawn_background_roller(std::time::Duration::from_secs(5));

    let orchestrator_id = uuid::Uuid::new_v4();
    let orchestrator = Arc::new(Orchestrator::new(
        orchestrator_id,
        Arc::clone(&registry),
        Arc::clone(&bus),
        Arc::new(NoopClassifier),
        Arc::clone(&audit),
        OrchestratorConfig {
            classification_enabled: config.orchestrator.classification_enabled,
            ..OrchestratorConfig::default()
        },
    ));

    let default_provider_id = provider_ids.first().cloned().unwrap_or_else(|| "default".to_string());
    let supervisors = wire_supervisors(
        orchestrator.as_ref(),
        &registry,
        &bus,
        &provider_pool,
        &default_provider_id,
        &config.supervisors,
    )
    .await
    .context("wiring supervisors")?;

    let mut tokens = HashMap::new();
    tokens.insert(cli.bootstrap_token.clone(), "admin".to_string());
    let verifier = Arc::new(StaticTokenVerifier::new(tokens, chrono::Duration::hours(12)));
    let sessions = Arc::new(SessionLayer::new(
        verifier,
        SessionConfig {
            idle_timeout: chrono::Duration::seconds(config.session.idle_timeout_secs as i64),
            client_buffer_capacity: config.session.client_buffer_bytes,
            ..SessionConfig::default()
        },
    ));

    let state = AppState {
        registry,
        provider_pool,
        provider_ids: Arc::new(provider_ids),
        bus,
        audit,
        orchestrator,
        sessions,
        supervisors: Arc::new(supervisors),
    };

    let app = conclave_gateway::router(state);
    let listener = tokio::net::TcpListener::bind(&cli.bind).await.context("binding gateway listener")?;
    tracing::info!(bind = %cli.bind, "conclave-gateway listening");
    axum::serve(listener, app).await.context("gateway serve loop")?;

    Ok(())
}
