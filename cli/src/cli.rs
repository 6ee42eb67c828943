use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "marketctl", version)]
pub struct Cli {
    /// Database connection string; defaults to the same env var the server uses.
    #[clap(long, env = "DATABASE_URL", default_value = "sqlite://marketplace_automation.db")]
    pub database_url: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates tables if they don't already exist.
    Migrate,

    /// Emergency pause: stops all schedules from firing and marks pending
    /// executor jobs skipped (§4.1/§4.2 "Cancellation").
    Pause,

    /// Reverses `pause`.
    Resume,

    /// Lists dead-letter entries awaiting manual review.
    DlqList {
        #[clap(long, default_value_t = 50)]
        limit: i64,
    },

    /// Marks a dead-letter entry resolved or discarded by an operator.
    DlqResolve {
        id: uuid::Uuid,
        #[clap(long)]
        discard: bool,
    },
}
