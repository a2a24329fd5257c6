pub mod commands;

pub use commands::{AgentAction, Cli, Command, ProviderAction};
