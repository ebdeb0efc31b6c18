//! Clap CLI definitions for keepsake.

use clap::{Parser, Subcommand};
use keepsake_types::ids::{CompanionId, OwnerId, SessionKey};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  keepsake remember -o u1 -c mia \"I'm a nurse and I live in Austin\"
  keepsake extract \"I have a headache\"
  keepsake session init -o u1 -c mia -s today
  keepsake session observe -o u1 -c mia -s today \"I'm sitting on the couch\"
  keepsake context -o u1 -c mia -s today
  keepsake decay --watch";

/// keepsake: long-lived memory for a companion persona.
#[derive(Parser)]
#[command(name = "keepsake", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract facts from a user message and store them.
    Remember {
        #[command(flatten)]
        pair: PairArgs,
        /// The user's message.
        message: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show what a message would be remembered as, without storing it.
    Extract {
        /// The message text.
        message: String,
        /// Treat the text as an assistant reply and show state updates.
        #[arg(long)]
        reply: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the context bundle for the next turn.
    Context {
        #[command(flatten)]
        session: SessionArgs,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run a decay pass over every trigger.
    Decay {
        /// Keep running passes on the configured interval until Ctrl+C.
        #[arg(long)]
        watch: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Manage per-session persona state [*].
    #[command(subcommand)]
    Session(SessionCommands),
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Create session and spatial state at baseline.
    Init {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Apply the state changes described in an assistant reply.
    Observe {
        #[command(flatten)]
        session: SessionArgs,
        /// The assistant's reply.
        message: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the stored session and spatial state.
    Show {
        #[command(flatten)]
        session: SessionArgs,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Whose memory, about which persona.
#[derive(clap::Args)]
pub struct PairArgs {
    /// Owner (user) id.
    #[arg(long, short = 'o')]
    pub owner: String,
    /// Companion (persona) id.
    #[arg(long, short = 'c')]
    pub companion: String,
}

impl PairArgs {
    pub fn ids(&self) -> (OwnerId, CompanionId) {
        (self.owner.as_str().into(), self.companion.as_str().into())
    }
}

/// One chat session.
#[derive(clap::Args)]
pub struct SessionArgs {
    #[command(flatten)]
    pub pair: PairArgs,
    /// Session id.
    #[arg(long, short = 's')]
    pub session: String,
}

impl SessionArgs {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(
            self.pair.owner.as_str(),
            self.pair.companion.as_str(),
            self.session.as_str(),
        )
    }
}
