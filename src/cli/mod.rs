pub mod commands;

use clap::{Parser, Subcommand};
use crate::error::Result;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "regional-news")]
#[command(about = "Regional RSS news cache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "REGIONAL_NEWS_CONFIG")]
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
    /// Write a default configuration and create the cache directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Fetch configured sources and merge them into the cache
    Refresh {
        /// Only refresh sources of this region
        #[arg(short, long)]
        region: Option<String>,

        /// Skip regions whose cache is still fresh
        #[arg(long, conflicts_with = "region")]
        stale_only: bool,
    },

    /// Show cached articles for a region
    Show {
        region: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Search cached articles by category
    Category {
        name: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Today's newest articles across all regions
    Digest {
        /// Defaults to `[cache] digest_limit`
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Newest articles across all regions
    Top {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Show cache statistics and health
    Stats,

    /// Drop cached articles
    Clear {
        /// Region to clear (all regions if omitted)
        region: Option<String>,
    },

    /// Manage bookmarked articles
    Bookmark {
        #[command(subcommand)]
        action: BookmarkAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum BookmarkAction {
    /// Bookmark an article by its link
    Add { id: String },
    /// Remove a bookmark
    Remove { id: String },
    /// List bookmarked articles
    List,
    /// Remove all bookmarks
    Clear,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if let Commands::Completions { shell } = self.command {
            commands::generate_completions(shell);
            return Ok(());
        }

        let config = commands::load_config(self.config.clone())?;
        let _log_guard = commands::init_logging(self.debug, self.verbose, &config.logging)?;

        match self.command {
            Commands::Init { force } => {
                commands::init(self.config, force).await
            }
            Commands::Refresh { region, stale_only } => {
                commands::refresh(&config, region, stale_only).await
            }
            Commands::Show { region, limit } => {
                commands::show(&config, &region, limit)
            }
            Commands::Category { name, limit } => {
                commands::category(&config, &name, limit)
            }
            Commands::Digest { limit } => {
                commands::digest(&config, limit)
            }
            Commands::Top { limit } => {
                commands::top(&config, limit)
            }
            Commands::Stats => {
                commands::stats(&config)
            }
            Commands::Clear { region } => {
                commands::clear(&config, region)
            }
            Commands::Bookmark { action } => {
                commands::bookmark(&config, action)
            }
            Commands::Completions { .. } => Ok(()),
        }
    }
}
