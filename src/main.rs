use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use conclave::bootstrap::wire_supervisors;
use conclave::cli::{AgentAction, Cli, Command, ProviderAction};
use conclave::infrastructure::config::ConfigLoader;
use conclave::infrastructure::database::{create_pool, PoolConfig};
use conclave::infrastructure::logging;
use conclave::services::agent_registry::{AgentRegistry, AgentRegistryConfig};
use conclave::services::audit_log::{AuditLogConfig, AuditLogService};
use conclave::services::message_bus::{BusConfig, MessageBus};
use conclave::services::orchestrator::{NoopClassifier, Orchestrator, OrchestratorConfig};
use conclave::services::provider_pool::{ProviderConfig, ProviderPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let project_root = std::env::current_dir().context("resolving project root")?;
    let config = ConfigLoader::new(&project_root)
        .load()
        .context("loading configuration")?;

    let _logger_guard = logging::init(&config.logging);

    let db_path = project_root.join(&config.database.path);
    let pool = create_pool(
        &db_path,
        &PoolConfig {
            max_connections: config.database.max_connections,
            min_connections: config.database.min_connections,
            acquire_timeout: std::time::Duration::from_secs(config.database.acquire_timeout_secs),
        },
    )
    .await
    .context("opening journal database")?;
    drop(pool);

    let registry = Arc::new(AgentRegistry::new(AgentRegistryConfig::default()));
    let provider_pool = Arc::new(ProviderPool::new());
    let audit = Arc::new(AuditLogService::new(AuditLogConfig::default()));

    for provider in &config.providers {
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

    let bus = Arc::new(MessageBus::new(BusConfig::default()));
    let orchestrator_id = uuid::Uuid::new_v4();
    let orchestrator = Orchestrator::new(
        orchestrator_id,
        Arc::clone(&registry),
        Arc::clone(&bus),
        Arc::new(NoopClassifier),
        Arc::clone(&audit),
        OrchestratorConfig {
            classification_enabled: config.orchestrator.classification_enabled,
            ..OrchestratorConfig::default()
        },
    );
    let default_provider_id = config
        .providers
        .first()
        .map(|p| p.id.clone())
        .unwrap_or_else(|| "default".to_string());
    let supervisors = wire_supervisors(
        &orchestrator,
        &registry,
        &bus,
        &provider_pool,
        &default_provider_id,
        &config.supervisors,
    )
    .await
    .context("wiring supervisors")?;

    match cli.command {
        Command::Serve => {
            tracing::info!(
                supervisors = supervisors.len(),
                "conclave engine booted; network transport is served by conclave-gateway"
            );
            tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
            tracing::info!("shutting down");
        }
        Command::Describe => {
            let snapshot = registry.snapshot().await;
            let rows: Vec<_> = snapshot
                .iter()
                .map(|a| {
                    (
                        a.id.to_string(),
                        format!("{:?}", a.tier),
                        a.capabilities.iter().cloned().collect::<Vec<_>>().join(","),
                        format!("{:?}", a.state),
                    )
                })
                .collect();
            let table = conclave::cli::commands::render_agent_table(&rows);
            println!("{table}");
        }
        Command::Stats => {
            for provider in &config.providers {
                if let Some(stats) = provider_pool.stats(&provider.id).await {
                    println!(
                        "{}: requests {}/{} tokens {}/{} in_flight {}/{} queue_depth {} health {:?}",
                        provider.id,
                        stats.used_requests,
                        stats.requests_per_window,
                        stats.used_tokens,
                        stats.tokens_per_window,
                        stats.in_flight,
                        stats.max_concurrent,
                        stats.queue_depth,
                        stats.health,
                    );
                }
            }
        }
        Command::Routes { limit } => {
            let routes = audit.recent_routes(limit).await;
            for route in routes {
                println!(
                    "{} -> {} ({})",
                    route.task_id, route.chosen_supervisor, route.rationale
                );
            }
        }
        Command::Provider { action } => match action {
            ProviderAction::Set { id, field, value } => {
                let Some(mut provider_config) = provider_pool.get_config(&id).await else {
                    anyhow::bail!("unknown provider: {id}");
                };
                provider_config
                    .apply_field(&field, &value)
                    .map_err(anyhow::Error::msg)?;
                provider_pool.configure(id.clone(), provider_config, chrono::Utc::now()).await;
                println!("provider {id} field {field}={value} applied (takes effect on next window roll)");
            }
            ProviderAction::Disable { id } => {
                provider_pool.disable(&id).await;
                println!("provider {id} disabled");
            }
            ProviderAction::Enable { id } => {
                provider_pool.enable(&id).await;
                println!("provider {id} enabled");
            }
        },
        Command::Agent { action } => match action {
            AgentAction::Deregister { id } => {
                let agent_id = id.parse().context("invalid agent id")?;
                registry.deregister(agent_id).await.context("deregistering agent")?;
                println!("agent {id} deregistered");
            }
        },
    }

    Ok(())
}
