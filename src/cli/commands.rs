//! Administrative CLI surface: an operator convenience over the same
//! administrative API the gateway exposes over HTTP (§6.1).

use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};

#[derive(Parser, Debug)]
#[command(name = "conclave", about = "Hierarchical multi-agent orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Boot the orchestrator and delegate network transport to the gateway.
    Serve,
    /// Print the supervisor/capability inventory.
    Describe,
    /// Print provider stats, queue depths, error rates.
    Stats,
    /// Print recent RouteDecision audit records.
    Routes {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Hot-update a ProviderQuota field.
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },
    /// Privileged deregister of an agent.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProviderAction {
    Set {
        id: String,
        field: String,
        value: String,
    },
    Disable {
        id: String,
    },
    Enable {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentAction {
    Deregister { id: String },
}

/// Renders a registry snapshot as a table, matching the teacher's
/// `comfy-table` CLI display conventions.
pub fn render_agent_table(rows: &[(String, String, String, String)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["id", "tier", "capabilities", "state"]);
    for (id, tier, capabilities, state) in rows {
        table.add_row(vec![id, tier, capabilities, state]);
    }
    table
}
