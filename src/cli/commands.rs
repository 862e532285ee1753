use crate::app::{new_corr_id, AppContext, GleanerError, Result};
use crate::domain::{
    EmitSpec, EmitType, EmittedData, FragmentSpec, Owner, PluginExecution, RenderDirectives,
    Repository, RetentionPolicy, ScrapeRequest, Source,
};
use crate::harvest::RefreshExpression;
use crate::plugins::{CompositeFilter, ConditionalTag};
use crate::scrape::ScrapeEngine;

pub async fn scrape(
    ctx: &AppContext,
    url: &str,
    render: bool,
    xpath: Option<String>,
    emit: &[String],
) -> Result<()> {
    let types = emit
        .iter()
        .map(|name| {
            EmitType::parse(name)
                .ok_or_else(|| GleanerError::RequestInvalid(format!("unknown emit type '{}'", name)))
        })
        .collect::<Result<Vec<_>>>()?;
    let fragment = match xpath {
        Some(xpath) => FragmentSpec::xpath(xpath),
        None => FragmentSpec::root(),
    };

    let mut request = ScrapeRequest::new(url).with_emit(EmitSpec::new(fragment, types));
    if render {
        request = request.rendered(RenderDirectives::default());
    }

    let mut response = ctx.engine.scrape(&new_corr_id(), &request).await?;
    if response.failed {
        eprintln!(
            "Scrape failed: {}",
            response.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    // Screenshots go to files in the working directory.
    for (i, element) in response.elements.iter_mut().enumerate() {
        for data in &mut element.data {
            if let EmittedData::Pixel(png) = data {
                let path = format!("fragment-{}.png", i);
                std::fs::write(&path, &png)?;
                println!("Wrote {} ({} bytes)", path, png.len());
                *data = EmittedData::Text(path);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn parse_feed(ctx: &AppContext, url: &str) -> Result<()> {
    let feed = ctx.feed_service().parse_feed_from_url(&new_corr_id(), url).await?;

    if let Some(title) = &feed.title {
        println!("Feed title: {}", title);
    }
    for item in &feed.items {
        let date = item
            .published_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());
        println!("{} {}\n           {}", date, item.display_title(), item.url);
    }
    println!("{} items", feed.items.len());
    Ok(())
}

pub async fn preview(
    ctx: &AppContext,
    urls: &[String],
    filters: Option<&str>,
    tags: Option<&str>,
) -> Result<()> {
    let requests: Vec<_> = urls.iter().map(ScrapeRequest::new).collect();
    let filters: Vec<CompositeFilter> = match filters {
        Some(json) => serde_json::from_str(json)?,
        None => Vec::new(),
    };
    let tags: Vec<ConditionalTag> = match tags {
        Some(json) => serde_json::from_str(json)?,
        None => Vec::new(),
    };

    let feed = ctx
        .feed_service()
        .parse_feed_from_request(&new_corr_id(), None, &requests, &filters, &tags)
        .await?;
    println!("{}", serde_json::to_string_pretty(&feed)?);
    Ok(())
}

pub async fn discover(ctx: &AppContext, url: &str) -> Result<()> {
    let request = ScrapeRequest::new(url)
        .with_emit(EmitSpec::new(FragmentSpec::root(), vec![EmitType::Feeds]));
    let response = ctx.engine.scrape(&new_corr_id(), &request).await?;
    if response.failed {
        return Err(GleanerError::FetchFailed(
            response.error_message.unwrap_or_else(|| url.to_string()),
        ));
    }

    let Some(feeds) = response.root_element().and_then(|e| e.feeds()) else {
        println!("No feeds found");
        return Ok(());
    };

    println!("Native feeds:");
    for feed in &feeds.native_feeds {
        println!(
            "  [{}] {} {}",
            feed.feed_type.as_str(),
            feed.url,
            feed.title.as_deref().unwrap_or("")
        );
    }
    println!("Generic feeds:");
    for rule in &feeds.generic_feeds {
        println!(
            "  score {:.1}, {} items: {} -> {}",
            rule.score, rule.count, rule.context_xpath, rule.link_xpath
        );
    }
    Ok(())
}

/// `id` or `id=<json params>`.
fn parse_plugin_arg(arg: &str) -> Result<PluginExecution> {
    match arg.split_once('=') {
        Some((id, params)) => Ok(PluginExecution::new(id.trim(), serde_json::from_str(params)?)),
        None => Ok(PluginExecution::new(arg.trim(), serde_json::Value::Null)),
    }
}

pub fn add_repository(
    ctx: &AppContext,
    title: &str,
    refresh: Option<String>,
    owner: &str,
    max_items: Option<u32>,
    max_age_days: Option<u32>,
    plugins: &[String],
) -> Result<String> {
    let refresh = refresh.unwrap_or_else(|| ctx.config.scheduler.default_refresh.clone());
    if !refresh.trim().is_empty() {
        RefreshExpression::parse(&refresh)?;
    }
    let plugins = plugins
        .iter()
        .map(|arg| parse_plugin_arg(arg))
        .collect::<Result<Vec<_>>>()?;
    ctx.registry.check(&plugins)?;

    if ctx.store.get_owner(owner)?.is_none() {
        ctx.store.add_owner(&Owner::new(owner, owner))?;
    }

    let mut repository = Repository::new(owner, title, refresh);
    repository.retention = RetentionPolicy {
        max_items,
        max_age_days,
    };
    repository.plugins = plugins;
    ctx.store.add_repository(&repository)?;

    println!("Added repository: {} ({})", repository.title, repository.id);
    Ok(repository.id)
}

pub fn list_repositories(ctx: &AppContext) -> Result<()> {
    let repositories = ctx.store.get_all_repositories()?;

    if repositories.is_empty() {
        println!("No repositories");
        return Ok(());
    }

    for repository in repositories {
        let next = repository
            .next_harvest_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "due".to_string());
        let archived = if repository.archived { " [archived]" } else { "" };
        println!(
            "{}{} ({})\n  refresh: {}, next: {}, failures: {}",
            repository.title,
            archived,
            repository.id,
            repository.refresh_expression,
            next,
            repository.failure_count
        );
        for source in &repository.sources {
            let marker = if source.erroneous { "!" } else { " " };
            println!("  {} {}", marker, source.display_title());
            if let Some(message) = &source.last_error_message {
                println!("      {}", message);
            }
        }
    }

    Ok(())
}

pub fn archive_repository(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.store.set_repository_archived(id, true)?;
    println!("Archived repository: {}", id);
    Ok(())
}

pub fn add_source(
    ctx: &AppContext,
    repository_id: &str,
    url: &str,
    title: Option<String>,
    render: bool,
    tags: &[String],
) -> Result<()> {
    let repository = ctx
        .store
        .get_repository(repository_id)?
        .ok_or_else(|| GleanerError::RepositoryNotFound(repository_id.to_string()))?;
    let owner = Some(repository.owner_id.as_str());

    let max_per_repository = ctx.engine.entitlements().max_sources_per_repository_for(owner);
    if repository.sources.len() >= max_per_repository {
        return Err(GleanerError::LimitExceeded(format!(
            "a repository may have at most {} sources",
            max_per_repository
        )));
    }
    let max_active = ctx.engine.entitlements().max_active_sources_for(owner);
    if ctx.store.count_active_sources(&repository.owner_id)? >= max_active {
        return Err(GleanerError::LimitExceeded(format!(
            "an owner may have at most {} active sources",
            max_active
        )));
    }

    let mut request = ScrapeRequest::new(url);
    if render {
        request = request.rendered(RenderDirectives::default());
    }
    ScrapeEngine::validate(&request)?;

    let mut source = Source::new(&repository.id, request);
    source.title = title;
    source.tags = tags.to_vec();
    ctx.store.add_source(&source)?;

    println!("Added source to {}: {}", repository.title, source.display_title());
    Ok(())
}

pub fn list_documents(ctx: &AppContext, repository_id: &str, limit: usize) -> Result<()> {
    let documents = ctx.store.get_documents(repository_id)?;

    if documents.is_empty() {
        println!("No documents");
        return Ok(());
    }

    for document in documents.iter().take(limit) {
        let tags = if document.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", document.tags.join(", "))
        };
        println!(
            "{} {}{}\n           {}",
            document.published_at.format("%Y-%m-%d"),
            document.display_title(),
            tags,
            document.url
        );
    }
    if documents.len() > limit {
        println!("... and {} more", documents.len() - limit);
    }

    Ok(())
}

pub async fn harvest_once(ctx: &AppContext) -> Result<()> {
    let summary = ctx.scheduler().tick().await?;
    println!(
        "Harvest complete: {} due, {} harvested, {} failed",
        summary.due, summary.succeeded, summary.failed
    );
    Ok(())
}

/// Runs the scheduler in the foreground until Ctrl-C.
pub async fn harvest_forever(ctx: &AppContext) -> Result<()> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    ctx.scheduler().run(rx).await
}
