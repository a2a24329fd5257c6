//! Conclave: a hierarchical multi-agent task orchestrator.
//!
//! Six cooperating components, leaves first: Provider Pool, Agent
//! Registry, Message Bus, Supervisor, Orchestrator, Session Layer. The
//! network-facing transport lives in the separate `conclave-gateway` crate.

pub mod bootstrap;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
