pub mod commands;

use clap::{Parser, Subcommand};
use crate::error::Result;
use crate::retention::Category;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "news-shelf")]
#[command(about = "Cached news retrieval with retention-based cleanup of saved items")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "NEWS_SHELF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Fetch the current top stories (cache first)
    Fetch {
        /// Clear the cache and go to the network
        #[arg(short, long)]
        force: bool,

        /// Print items as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep the cache warm and print every refresh until interrupted
    Watch,

    /// Save an item under a category
    Save {
        /// Item id
        item_id: u64,

        /// ephemeral (read later) or durable (saved)
        #[arg(short = 'C', long, default_value = "ephemeral")]
        category: Category,

        /// Owner of the record
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Move a saved item to another category (resets its age)
    Move {
        /// Item id
        item_id: u64,

        /// Current category
        from: Category,

        /// Target category
        to: Category,

        /// Owner of the record
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Remove a saved item
    Remove {
        /// Item id
        item_id: u64,

        #[arg(short = 'C', long, default_value = "ephemeral")]
        category: Category,

        /// Owner of the record
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// List saved items
    List {
        /// Only this owner's records
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Delete saved items past their retention window now
    Cleanup {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Count saved items that will expire soon
    Expiring,

    /// Run background refresh and the daily cleanup until interrupted
    Daemon,

    /// Show cache and saved-item status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if let Commands::Completions { shell } = self.command {
            commands::generate_completions(shell);
            return Ok(());
        }

        if let Commands::Init { force } = self.command {
            commands::init_logging(self.debug, self.verbose, None)?;
            return commands::init(self.config, force).await;
        }

        let config = commands::load_config(self.config.as_deref())?;
        // Held until the command finishes so buffered log lines are flushed.
        let _log_guard = commands::init_logging(self.debug, self.verbose, Some(&config.logging))?;

        match self.command {
            Commands::Fetch { force, json } => commands::fetch(&config, force, json).await,
            Commands::Watch => commands::watch(&config).await,
            Commands::Save { item_id, category, owner } => {
                commands::save(&config, &owner, item_id, category).await
            }
            Commands::Move { item_id, from, to, owner } => {
                commands::move_item(&config, &owner, item_id, from, to).await
            }
            Commands::Remove { item_id, category, owner } => {
                commands::remove(&config, &owner, item_id, category).await
            }
            Commands::List { owner } => commands::list(&config, owner.as_deref()).await,
            Commands::Cleanup { json } => commands::cleanup(&config, json).await,
            Commands::Expiring => commands::expiring(&config).await,
            Commands::Daemon => commands::daemon(&config).await,
            Commands::Status => commands::status(&config).await,
            Commands::Init { .. } | Commands::Completions { .. } => Ok(()),
        }
    }
}
