use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gleaner::app::AppContext;
use gleaner::cli::{commands, Cli, Commands, DaemonAction, RepoAction, SourceAction};
use gleaner::config::Config;
use gleaner::daemon::{daemon_status, stop_daemon, Daemon};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gleaner=info"))
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter())
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(env_filter())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Daemon {
            action: DaemonAction::Start { log },
        } => log.as_deref(),
        _ => None,
    };
    init_tracing(log_file)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start { .. } => {
                let ctx = AppContext::new(cli.db, config)?;
                Daemon::new(ctx).run().await?;
            }
            DaemonAction::Stop => match stop_daemon() {
                Ok(()) => println!("Daemon stopped"),
                Err(e) => anyhow::bail!(e),
            },
            DaemonAction::Status => println!("{}", daemon_status()),
        },
        command => {
            let ctx = AppContext::new(cli.db, config)?;
            run_command(&ctx, command).await?;
        }
    }

    Ok(())
}

async fn run_command(ctx: &AppContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Scrape {
            url,
            render,
            xpath,
            emit,
        } => commands::scrape(ctx, &url, render, xpath, &emit).await?,
        Commands::ParseFeed { url } => commands::parse_feed(ctx, &url).await?,
        Commands::Preview {
            urls,
            filters,
            tags,
        } => commands::preview(ctx, &urls, filters.as_deref(), tags.as_deref()).await?,
        Commands::Discover { url } => commands::discover(ctx, &url).await?,
        Commands::Repo { action } => match action {
            RepoAction::Add {
                title,
                refresh,
                owner,
                max_items,
                max_age_days,
                plugin,
            } => {
                commands::add_repository(ctx, &title, refresh, &owner, max_items, max_age_days, &plugin)?;
            }
            RepoAction::List => commands::list_repositories(ctx)?,
            RepoAction::Archive { id } => commands::archive_repository(ctx, &id)?,
        },
        Commands::Source { action } => match action {
            SourceAction::Add {
                repository_id,
                url,
                title,
                render,
                tag,
            } => commands::add_source(ctx, &repository_id, &url, title, render, &tag)?,
        },
        Commands::Documents {
            repository_id,
            limit,
        } => commands::list_documents(ctx, &repository_id, limit)?,
        Commands::Harvest { once } => {
            if once {
                commands::harvest_once(ctx).await?;
            } else {
                commands::harvest_forever(ctx).await?;
            }
        }
        Commands::Daemon { .. } => {}
    }
    Ok(())
}
