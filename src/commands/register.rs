//! Register command handler: optimistic registration of a just-started run.

use crate::error::Result;
use crate::output::{print_success, GRAY, RESET};
use crate::run::{NewRun, RunRecord, Tool};

use super::CommandContext;

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub tool: String,
    /// Server-assigned id; a `pending-` placeholder is generated when absent.
    pub id: Option<String>,
    pub parent: Option<String>,
    pub route: Option<String>,
}

/// Register a run as running right away, before the server has echoed it.
pub fn register_command(ctx: &CommandContext, options: RegisterOptions) -> Result<RunRecord> {
    let tool = Tool::from(options.tool);
    let mut new_run = match options.id {
        Some(id) => NewRun::started(id, tool),
        None => NewRun::placeholder(tool),
    };
    if let Some(parent) = options.parent {
        new_run = new_run.with_parent(parent);
    }
    if let Some(route) = options.route {
        new_run = new_run.with_route(route);
    }

    let run = ctx.store.register_run(new_run)?;
    print_success(&format!("Registered {} run {}", run.tool, run.id));
    println!("{GRAY}-> {}{RESET}", ctx.store.get_run_route(&run));
    Ok(run)
}
