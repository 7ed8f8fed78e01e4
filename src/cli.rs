use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Command-line interface definition.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Find and execute mailing-list unsubscribe methods"
)]
pub struct Cli {
    /// Database path (overrides UNSUB_DB_PATH)
    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Record the unsubscribe methods found in .eml files
    Ingest {
        /// Account that received the messages
        #[arg(long)]
        account: String,

        #[arg(value_name = "FILE.eml", required = true)]
        files: Vec<PathBuf>,
    },

    /// Execute the active unsubscribe method of a subscriber
    Unsubscribe {
        #[arg(long)]
        id: Uuid,

        /// Evaluate everything but contact nobody
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Never unsubscribe from this subscriber
    Keep { id: Uuid },

    /// Clear the keep flag
    Unkeep { id: Uuid },

    /// Print a subscriber with its history and attempts
    Show { id: Uuid },
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unsubscribe_flags() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "unsubscriber",
            "unsubscribe",
            "--id",
            &id.to_string(),
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::Unsubscribe { id: parsed, dry_run, yes } => {
                assert_eq!(parsed, id);
                assert!(dry_run);
                assert!(!yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ingest_requires_files() {
        assert!(Cli::try_parse_from(["unsubscriber", "ingest", "--account", "a"]).is_err());
    }
}
