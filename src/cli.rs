use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "storyforge")]
#[command(author, version, about = "Resumable storyboard generation")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decompose a prompt into scenes and generate every scene
    Run {
        /// Natural-language request
        #[arg(short, long, required = true)]
        prompt: String,

        /// Number of scenes to ask for (the service decides if omitted)
        #[arg(short, long)]
        scenes: Option<u32>,

        /// Model provider (defaults to pipeline.default_provider)
        #[arg(long)]
        provider: Option<String>,

        /// Storyboard name (derived from the prompt if omitted)
        #[arg(long)]
        name: Option<String>,

        /// Keep checkpoints in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Continue an interrupted storyboard from its last checkpoint
    Resume {
        /// Storyboard id (proposed or canonical)
        id: String,
    },

    /// Resume every storyboard still marked in progress
    ResumePending,

    /// Display a stored storyboard
    Show {
        /// Storyboard id
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored storyboards
    List {
        #[arg(long, default_value = "0")]
        offset: i64,

        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Delete a stored storyboard
    Delete {
        /// Storyboard id
        id: String,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
