pub mod agent_registry;
pub mod audit_log;
pub mod message_bus;
pub mod orchestrator;
pub mod provider_pool;
pub mod session_layer;
pub mod supervisor;
