use clap::{Parser, Subcommand};

use crate::search::SearchMode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the search API.
    Serve {},

    /// Search an owner's bookmarks from the command line
    Search {
        /// Search text
        query: String,

        /// Whose bookmarks to search
        #[clap(short, long)]
        owner: String,

        #[clap(short, long, value_enum, default_value_t = SearchMode::Hybrid)]
        mode: SearchMode,

        /// Maximum number of results (defaults to search.default_limit)
        #[clap(short, long)]
        limit: Option<i64>,

        /// Minimum fused score (defaults to search.default_threshold)
        #[clap(short, long)]
        threshold: Option<f64>,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Create a bookmark and index it
    Add {
        #[clap(short, long)]
        owner: String,

        #[clap(short, long)]
        url: String,

        #[clap(short, long)]
        title: Option<String>,

        #[clap(short, long)]
        description: Option<String>,

        #[clap(long)]
        summary: Option<String>,

        #[clap(long)]
        favicon_url: Option<String>,

        /// Comma separated tags
        #[clap(long)]
        tags: Option<String>,

        /// Comma separated category names
        #[clap(short, long)]
        categories: Option<String>,
    },

    /// Update a bookmark, re-indexing it if its text changed
    Update {
        #[clap(short, long)]
        owner: String,

        #[clap(long)]
        id: u64,

        #[clap(short, long)]
        url: Option<String>,

        #[clap(short, long)]
        title: Option<String>,

        #[clap(short, long)]
        description: Option<String>,

        #[clap(long)]
        summary: Option<String>,

        /// Replace tags
        #[clap(long)]
        tags: Option<String>,

        /// Replace categories
        #[clap(short, long)]
        categories: Option<String>,
    },

    /// Delete a bookmark
    Delete {
        #[clap(short, long)]
        owner: String,

        #[clap(long)]
        id: u64,
    },

    /// Embed missing or stale bookmarks and prune deleted ones.
    Reindex {},
}
