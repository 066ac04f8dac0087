use clap::{Parser, Subcommand};

use entire::config::Config;
use entire::engine::{CheckpointEngine, TurnStartOptions};
use entire::git::repository::Repository;
use entire::utils::init_logging;

/// Hook-invoked entry point for the checkpoint engine. The CLI surface that wraps this
/// (`enable`, `disable`, `status`, `reset`, `rewind`) lives outside this core and is not
/// implemented here; these subcommands are the direct FSM-event triggers an adapter calls.
#[derive(Parser)]
#[command(name = "entire", disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// A turn has started: a prompt was sent to the agent.
    TurnStart {
        #[arg(long)]
        session: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// A turn has ended: the agent has finished responding.
    TurnEnd {
        #[arg(long)]
        session: String,
    },
    /// A git commit just landed in the worktree.
    PostCommit {
        #[arg(long)]
        session: String,
    },
    /// A coding session has started.
    SessionStart {
        #[arg(long)]
        session: String,
    },
    /// A coding session has ended.
    SessionStop {
        #[arg(long)]
        session: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    if Config::get().disabled {
        return Ok(());
    }

    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let repo = Repository::discover(&cwd)?;
    let engine = CheckpointEngine::new(&repo);

    match cli.command {
        Command::TurnStart { session, agent, prompt } => {
            engine.turn_start(&TurnStartOptions {
                session_id: session,
                agent,
                prompt,
                worktree_id: String::new(),
            })?;
        }
        Command::TurnEnd { session } => {
            engine.turn_end(&session)?;
        }
        Command::PostCommit { session } => {
            engine.post_commit(&session)?;
        }
        Command::SessionStart { session } => {
            engine.session_start(&session, "")?;
        }
        Command::SessionStop { session } => {
            engine.session_stop(&session)?;
        }
    }

    Ok(())
}
