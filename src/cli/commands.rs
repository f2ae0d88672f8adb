use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::{BookmarkAction, Cli};
use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use crate::feed::coordinator::{FetchCoordinator, FetchReport, RegionStatus, SourceOutcome};
use crate::feed::ArticleRecord;
use crate::storage::{CacheStore, Freshness, MergeKind, PersistentCache, PersistentCacheConfig};

/// Write a default configuration and create the cache directory
pub async fn init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    info!("Initializing regional-news configuration");

    let config_file = get_config_file(config_path)?;
    if config_file.exists() && !force {
        warn!("Configuration file already exists: {}", config_file.display());
        println!("⚠️  Configuration already exists: {}", config_file.display());
        println!("   Use --force to overwrite it with defaults.");
        return Ok(());
    }

    let config = Config::default();
    config.save(&config_file)?;
    info!("Created default configuration: {}", config_file.display());

    let cache_dir = config.resolved_cache_dir()?;
    fs::create_dir_all(&cache_dir)?;

    println!("✅ regional-news initialized successfully!");
    println!("   Config file: {}", config_file.display());
    println!("   Cache directory: {}", cache_dir.display());
    println!("   Sources: {} across {} regions", config.sources.len(), config.regions().len());
    println!();
    println!("Next steps:");
    println!("   1. Edit the [[sources]] list in the config file");
    println!("   2. Fetch articles: regional-news refresh");

    Ok(())
}

/// Fetch configured sources and merge them into the cache
pub async fn refresh(config: &Config, region: Option<String>, stale_only: bool) -> Result<()> {
    if config.sources.is_empty() {
        println!("📋 No sources configured yet.");
        return Ok(());
    }

    let (_, store) = open_cache(config)?;
    let coordinator = FetchCoordinator::from_config(config, Arc::clone(&store))?;

    let report = match region {
        Some(region) => {
            println!("🔄 Refreshing region: {}", region);
            coordinator.refresh_region(&region).await?
        }
        None if stale_only => {
            println!("🔄 Refreshing stale regions...");
            coordinator.refresh_stale().await
        }
        None => {
            println!("🔄 Refreshing all regions...");
            coordinator.refresh_all().await
        }
    };

    print_report(&report);

    if let Err(e) = store.flush() {
        warn!("Failed to save cache: {}", e);
        println!("⚠️  Cache could not be saved: {}", e);
    }

    Ok(())
}

/// Show cached articles for a region
pub fn show(config: &Config, region: &str, limit: usize) -> Result<()> {
    let (_, store) = open_cache(config)?;

    if store.freshness(region) == Freshness::Empty {
        let known = config.regions();
        if !known.iter().any(|r| r == region) {
            return Err(Error::NotFound(format!(
                "Region '{}' is not configured (known: {})",
                region,
                known.join(", ")
            )));
        }
        println!("📭 Nothing cached for {} yet. Run: regional-news refresh --region {}", region, region);
        return Ok(());
    }

    let articles = store.get(region);
    println!("📰 {} ({} articles)", region, articles.len());
    print_staleness(&store, region);
    print_articles(articles.iter().take(limit));

    Ok(())
}

/// Search cached articles by category
pub fn category(config: &Config, name: &str, limit: usize) -> Result<()> {
    let (_, store) = open_cache(config)?;
    let articles = store.get_by_category(name);

    if articles.is_empty() {
        println!("🔍 No cached articles in categories matching '{}'", name);
        return Ok(());
    }

    println!("🔍 {} articles in categories matching '{}'", articles.len(), name);
    print_articles(articles.iter().take(limit));
    Ok(())
}

/// Today's newest articles across all regions
pub fn digest(config: &Config, limit: Option<usize>) -> Result<()> {
    let (_, store) = open_cache(config)?;
    let limit = limit.unwrap_or(config.cache.digest_limit);
    let articles = store.get_daily_digest(limit);

    println!("🗞️  Daily digest for {}", Local::now().format("%A, %d %B %Y"));
    if articles.is_empty() {
        println!("   Nothing published today yet.");
        return Ok(());
    }

    print_articles(articles.iter());
    Ok(())
}

/// Newest articles across all regions
pub fn top(config: &Config, limit: usize) -> Result<()> {
    let (_, store) = open_cache(config)?;
    let articles = store.top(limit);

    if articles.is_empty() {
        println!("📭 The cache is empty. Run: regional-news refresh");
        return Ok(());
    }

    println!("🔝 Latest {} articles", articles.len());
    print_articles(articles.iter());
    Ok(())
}

/// Show cache statistics and health
pub fn stats(config: &Config) -> Result<()> {
    let (persistence, store) = open_cache(config)?;
    let stats = store.stats();

    println!("📊 Cache Status");
    println!("===============");
    println!("   Location: {}", persistence.location());
    println!("   Articles: {}", stats.total_articles);
    println!("   Regions: {}", stats.total_regions);
    if let Some(oldest) = stats.oldest_cache_timestamp {
        println!("   Oldest refresh: {}", oldest.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(newest) = stats.newest_cache_timestamp {
        println!("   Newest refresh: {}", newest.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
    }
    println!("   Health: {}", if stats.is_healthy { "✅ healthy" } else { "❌ needs refresh" });

    println!("\n📍 Regions:");
    for region in config.regions() {
        let count = stats.articles_by_region.get(&region).copied().unwrap_or(0);
        let state = match store.freshness(&region) {
            Freshness::Empty => "empty".to_string(),
            Freshness::Fresh { age } => format!("fresh, {}", describe_age(age)),
            Freshness::Stale { age: Some(age) } => format!("stale, {}", describe_age(age)),
            Freshness::Stale { age: None } => "stale".to_string(),
        };
        println!("   {:<12} {:>4} articles ({})", region, count, state);
    }

    let bookmarks = persistence.load_bookmarks();
    println!("\n🔖 Bookmarks: {}", bookmarks.count());

    Ok(())
}

/// Drop cached articles for one region or all of them
pub fn clear(config: &Config, region: Option<String>) -> Result<()> {
    let (_, store) = open_cache(config)?;

    match region {
        Some(region) => {
            if store.clear(&region) {
                println!("🗑️  Cleared cache for {}", region);
            } else {
                println!("📭 Nothing cached for {}", region);
            }
        }
        None => {
            store.clear_all();
            println!("🗑️  Cleared all cached articles");
        }
    }

    store.flush()
}

/// Manage bookmarked articles
pub fn bookmark(config: &Config, action: BookmarkAction) -> Result<()> {
    let (persistence, store) = open_cache(config)?;
    let mut bookmarks = persistence.load_bookmarks();

    match action {
        BookmarkAction::Add { id } => {
            if bookmarks.add(id.trim()) {
                persistence.save_bookmarks(&bookmarks)?;
                println!("🔖 Bookmarked {}", id.trim());
            } else {
                println!("🔖 Already bookmarked: {}", id.trim());
            }
        }
        BookmarkAction::Remove { id } => {
            if bookmarks.remove(id.trim()) {
                persistence.save_bookmarks(&bookmarks)?;
                println!("🗑️  Removed bookmark {}", id.trim());
            } else {
                return Err(Error::NotFound(format!("No bookmark for '{}'", id.trim())));
            }
        }
        BookmarkAction::List => {
            if bookmarks.is_empty() {
                println!("🔖 No bookmarks yet.");
                return Ok(());
            }

            println!("🔖 {} bookmarks", bookmarks.count());
            for id in bookmarks.iter() {
                match store.find(id) {
                    Some(article) => println!("\n   {}\n   {}", article.display_title(), id),
                    None => println!("\n   (no longer cached)\n   {}", id),
                }
            }
        }
        BookmarkAction::Clear => {
            let count = bookmarks.count();
            bookmarks.clear();
            persistence.save_bookmarks(&bookmarks)?;
            println!("🗑️  Removed {} bookmarks", count);
        }
    }

    Ok(())
}

/// Generate shell completions
pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let cmd_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, cmd_name, &mut std::io::stdout());
}

/// Initialize logging based on verbosity flags and the `[logging]` section.
///
/// The returned guard flushes the file writer on drop and must be held until
/// the command finishes.
pub fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        let fallback = if logging.log_to_file { logging.level.as_str() } else { "warn" };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    };

    let (writer, guard) = if logging.log_to_file {
        let path = resolve_log_file(&logging.log_file)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::Config(format!("Invalid log file path: {}", logging.log_file)))?;
        fs::create_dir_all(dir)?;

        let (non_blocking, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
        (BoxMakeWriter::new(non_blocking), Some(guard))
    } else {
        (BoxMakeWriter::new(std::io::stderr), None)
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug);

    let result = if logging.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    debug!("Logging initialized");
    Ok(guard)
}

/// Loads the config file, falling back to defaults when the default path
/// hasn't been initialized. An explicit path must exist.
pub fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let explicit = config_path.is_some();
    let config_file = get_config_file(config_path)?;

    if config_file.exists() {
        return Config::load_with_env(&config_file);
    }
    if explicit {
        return Err(Error::NotFound(format!(
            "Configuration file not found: {}",
            config_file.display()
        )));
    }

    debug!("No configuration at {}, using defaults", config_file.display());
    let mut config = Config::default();
    if let Ok(dir) = std::env::var("REGIONAL_NEWS_CACHE_DIR") {
        config.cache.cache_dir = Some(PathBuf::from(dir));
    }
    Ok(config)
}

/// Opens the persisted cache. Never fails on unreadable cache contents, only
/// on an unusable cache directory.
pub fn open_cache(config: &Config) -> Result<(Arc<PersistentCache>, Arc<CacheStore>)> {
    let persistence = Arc::new(PersistentCache::open(PersistentCacheConfig {
        cache_dir: config.resolved_cache_dir()?,
    })?);
    let store = Arc::new(CacheStore::open(config.cache_config(), Arc::clone(&persistence)));
    Ok((persistence, store))
}

fn get_config_file(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => Ok(Config::config_dir()?.join("config.toml")),
    }
}

/// Relative log paths live under the config directory.
fn resolve_log_file(log_file: &str) -> Result<PathBuf> {
    let path = PathBuf::from(log_file);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(Config::config_dir()?.join(path))
    }
}

fn print_report(report: &FetchReport) {
    for source in &report.sources {
        match &source.outcome {
            SourceOutcome::Fetched { articles } => {
                println!("   ✅ {} ({}): {} articles", source.source, source.region, articles);
            }
            SourceOutcome::Unavailable { error } => {
                println!("   ❌ {} ({}): {}", source.source, source.region, error);
            }
        }
    }

    println!("\n📊 Refresh Summary:");
    for update in &report.regions {
        match &update.status {
            RegionStatus::Merged(outcome) => {
                let kind = match outcome.kind {
                    MergeKind::Reset => "replaced",
                    MergeKind::Incremental => "merged",
                };
                println!(
                    "   {:<12} {} (+{} / -{}, {} total)",
                    update.region, kind, outcome.added, outcome.removed, outcome.total
                );
            }
            RegionStatus::Partial { outcome, failed_sources } => {
                println!(
                    "   {:<12} partial, {} sources failed (+{}, {} total)",
                    update.region, failed_sources, outcome.added, outcome.total
                );
            }
            RegionStatus::Unavailable => {
                println!("   {:<12} unavailable, keeping cached articles", update.region);
            }
        }
    }

    let failed = report.failures().count();
    println!("   ✅ Successful sources: {}", report.succeeded());
    if failed > 0 {
        println!("   ❌ Failed sources: {}", failed);
    }
}

fn print_staleness(store: &CacheStore, region: &str) {
    match store.freshness(region) {
        Freshness::Stale { age: Some(age) } => {
            println!("   ⏳ Showing cached data from {}", describe_age(age));
        }
        Freshness::Stale { age: None } => {
            println!("   ⏳ Showing cached data of unknown age");
        }
        _ => {}
    }
}

fn print_articles<'a>(articles: impl Iterator<Item = &'a ArticleRecord>) {
    for article in articles {
        let published = article
            .published_at
            .map(|p| p.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "undated".to_string());

        println!("\n   {}", article.display_title());
        println!("   {} · {} · {} · {}", article.source, article.region, article.category, published);
        if !article.summary.is_empty() {
            println!("   {}", article.summary);
        }
        println!("   {}", article.id);
    }
}

fn describe_age(age: std::time::Duration) -> String {
    let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}
