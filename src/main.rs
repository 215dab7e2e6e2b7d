//! runwatch CLI entry point.
//!
//! Parses command-line arguments and dispatches to the appropriate command handler.

use clap::{Parser, Subcommand};
use runwatch::commands::{
    cancel_command, clear_history_command, config_display_command, dismiss_command,
    history_command, register_command, resolve_session, route_command, session_end_command,
    status_command, track_command, watch_command, CommandContext, RegisterOptions,
    SESSION_ENV_VAR,
};
use runwatch::config::load_config;
use runwatch::output::print_error;
use runwatch::signal::SignalHandler;
use runwatch::tracker::TrackerPhase;

#[derive(Parser)]
#[command(name = "runwatch")]
#[command(
    version,
    about = "Track long-running jobs on the job server from the terminal",
    after_help = "EXAMPLES:
    runwatch status                      # Refresh and list runs
    runwatch watch                       # Live banner of running jobs
    runwatch track 7f3c                  # Progress bar for one run
    runwatch register backtester --id 7f3c
    runwatch dismiss 7f3c                # Hide from this session's banner"
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Dismissal session name (defaults to $RUNWATCH_SESSION, then "default")
    #[arg(long, global = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh active runs once and list every known run
    Status,

    /// Poll continuously and show the running-jobs banner until Ctrl+C
    Watch,

    /// Follow one run's progress until it finishes
    Track {
        /// Run id
        id: String,
    },

    /// Register a run you just started so it is tracked immediately
    Register {
        /// Tool that runs the job (e.g. trainer, backtester, labeling-optimizer)
        tool: String,

        /// Server-assigned run id; a placeholder id is generated if omitted
        #[arg(long)]
        id: Option<String>,

        /// Parent run id (analysis runs belong to a trainer run)
        #[arg(long)]
        parent: Option<String>,

        /// Explicit result route, overriding the computed one
        #[arg(long)]
        route: Option<String>,
    },

    /// Hide runs from this session's banner without changing them
    Dismiss {
        /// Run ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Session management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Cancel a run
    Cancel {
        /// Run id
        id: String,
    },

    /// Pull recent runs from the server and list them
    History {
        /// Maximum number of runs
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Forget every tracked run
    ClearHistory,

    /// Print where a run's results can be viewed
    Route {
        /// Run id
        id: String,

        /// Show all run details, not just the route
        #[arg(short, long)]
        details: bool,
    },

    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum SessionAction {
    /// End the session, clearing its dismissals
    End,
}

fn run(cli: Cli) -> runwatch::Result<()> {
    let config = load_config()?;
    let session = resolve_session(cli.session.as_deref(), std::env::var(SESSION_ENV_VAR).ok());

    let ctx = CommandContext::open(config, session)?;
    match cli.command {
        Commands::Status => status_command(&ctx),
        Commands::Watch => {
            let signal = SignalHandler::new()?;
            watch_command(&ctx, &signal)
        }
        Commands::Track { id } => {
            let signal = SignalHandler::new()?;
            match track_command(&ctx, &id, &signal)? {
                TrackerPhase::Failed { message, .. } => {
                    Err(runwatch::RunwatchError::RunFailed { id, message })
                }
                _ => Ok(()),
            }
        }
        Commands::Register {
            tool,
            id,
            parent,
            route,
        } => register_command(
            &ctx,
            RegisterOptions {
                tool,
                id,
                parent,
                route,
            },
        )
        .map(|_| ()),
        Commands::Dismiss { ids } => dismiss_command(&ctx, &ids),
        Commands::Session {
            action: SessionAction::End,
        } => session_end_command(&ctx),
        Commands::Cancel { id } => cancel_command(&ctx, &id).map(|_| ()),
        Commands::History { limit } => history_command(&ctx, limit),
        Commands::ClearHistory => clear_history_command(&ctx),
        Commands::Route { id, details } => route_command(&ctx, &id, details),
        Commands::Config => config_display_command(&ctx.config),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = runwatch::logging::init(cli.verbose) {
        eprintln!("{}", e);
    }

    if let Err(e) = run(cli) {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}
