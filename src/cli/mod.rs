pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gleaner")]
#[command(about = "Scrape pages, discover feeds and harvest repositories on a schedule", long_about = None)]
pub struct Cli {
    /// Database file (default: <data dir>/gleaner/gleaner.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (default: <config dir>/gleaner/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape a URL and print the extracted payloads as JSON
    Scrape {
        url: String,

        /// Render the page in a headless browser first
        #[arg(long)]
        render: bool,

        /// XPath of the fragment to extract (default: whole document)
        #[arg(long)]
        xpath: Option<String>,

        /// Payload types: markup, text, pixel, feeds, readability
        #[arg(short, long, value_delimiter = ',', default_value = "markup")]
        emit: Vec<String>,
    },
    /// Fetch a feed and print its items
    ParseFeed {
        url: String,
    },
    /// Preview the feed a set of pages would produce
    Preview {
        urls: Vec<String>,

        /// Filters as JSON, e.g. '[{"include":{"title":{"operator":"contains","value":"rust"}}}]'
        #[arg(long)]
        filters: Option<String>,

        /// Conditional tags as JSON, e.g. '[{"tag":"top","filter":{"index":{"operator":"lt","value":3}}}]'
        #[arg(long)]
        tags: Option<String>,
    },
    /// List the native feeds and generic feed rules found on a page
    Discover {
        url: String,
    },
    /// Manage repositories
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    /// Manage sources of a repository
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// List the documents stored in a repository
    Documents {
        repository_id: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Harvest due repositories
    Harvest {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
    /// Background daemon for scheduled harvests
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
pub enum RepoAction {
    /// Create a repository
    Add {
        title: String,

        /// Refresh expression: "30m", "1h", "1d" or a six-field cron expression
        #[arg(short, long)]
        refresh: Option<String>,

        #[arg(long, default_value = "local")]
        owner: String,

        /// Keep at most this many released documents
        #[arg(long)]
        max_items: Option<u32>,

        /// Delete released documents older than this many days
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Plugin to run, in order: "id" or "id=<json params>"
        #[arg(short, long)]
        plugin: Vec<String>,
    },
    /// List repositories
    List,
    /// Archive a repository; archived repositories are never harvested
    Archive {
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SourceAction {
    /// Add a URL to scrape to a repository
    Add {
        repository_id: String,
        url: String,

        #[arg(long)]
        title: Option<String>,

        /// Render the page in a headless browser
        #[arg(long)]
        render: bool,

        /// Tag added to every document of this source
        #[arg(short, long)]
        tag: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the background daemon
    Start {
        /// Log file path (default: stdout)
        #[arg(short, long)]
        log: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}
