use std::sync::Arc;

use conclave::bootstrap::RunningSupervisor;
use conclave::services::agent_registry::AgentRegistry;
use conclave::services::audit_log::AuditLogService;
use conclave::services::message_bus::MessageBus;
use conclave::services::orchestrator::{NoopClassifier, Orchestrator};
use conclave::services::provider_pool::ProviderPool;
use conclave::services::session_layer::SessionLayer;

use crate::auth::StaticTokenVerifier;

pub type GatewayOrchestrator = Orchestrator<NoopClassifier>;
pub type GatewaySessionLayer = SessionLayer<StaticTokenVerifier>;

/// Shared, cloneable handle passed to every axum handler. Each field is
/// itself an `Arc`-backed service, so cloning `AppState` is cheap.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub provider_pool: Arc<ProviderPool>,
    pub provider_ids: Arc<Vec<String>>,
    pub bus: Arc<MessageBus>,
    pub audit: Arc<AuditLogService>,
    pub orchestrator: Arc<GatewayOrchestrator>,
    pub sessions: Arc<GatewaySessionLayer>,
    pub supervisors: Arc<Vec<RunningSupervisor>>,
}
