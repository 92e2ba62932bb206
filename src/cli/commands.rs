use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::Cli;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use crate::feed::pipeline::{FetchPipeline, Mode, Notice, Origin, Retrieval};
use crate::feed::refresher::BackgroundRefresher;
use crate::retention::{
    Category, FileRecordStore, RecordKey, RecordStore, RetentionCleanupService, RetentionPolicy,
    RetentionRecord,
};
use crate::storage::{CachePolicy, CacheStore, FileBackend};

/// Write a default configuration file
pub async fn init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    info!("Initializing news-shelf configuration");

    let config_file = get_config_file(config_path)?;
    if config_file.exists() && !force {
        warn!("Configuration file already exists: {}", config_file.display());
        println!("Configuration already exists: {}", config_file.display());
        println!("   Use --force to overwrite it.");
        return Ok(());
    }

    if let Some(dir) = config_file.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
            info!("Created configuration directory: {}", dir.display());
        }
    }

    let config = Config::default();
    config.save(&config_file)?;
    info!("Created default configuration: {}", config_file.display());

    println!("✅ news-shelf initialized");
    println!("   Config file: {}", config_file.display());
    println!("   Cache file:  {}", config.cache_file()?.display());
    println!("   Saved items: {}", config.records_file()?.display());
    println!();
    println!("Next steps:");
    println!("   1. Fetch stories:  news-shelf fetch");
    println!("   2. Save one:       news-shelf save <item-id>");

    Ok(())
}

/// Load the configuration, falling back to defaults when the default file is absent.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_with_env(path),
        None => {
            let path = get_config_file(None)?;
            if path.exists() {
                Config::load_with_env(&path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub async fn fetch(config: &Config, force: bool, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    let now = SystemClock.now();

    let result = if force {
        info!("Forcing refresh from the network");
        pipeline.force_refresh(now).await
    } else {
        pipeline.retrieve_with(now, Mode::PreferCache).await
    };

    if json {
        let output = serde_json::to_string_pretty(&result.items)?;
        println!("{}", output);
        return Ok(());
    }

    print_retrieval(&result);
    Ok(())
}

pub async fn watch(config: &Config) -> Result<()> {
    let pipeline = Arc::new(open_pipeline(config)?);
    let refresher = BackgroundRefresher::new(pipeline, Arc::new(SystemClock));
    let mut updates = refresher.subscribe();

    refresher.start(config.refresh.interval())?;
    println!(
        "👀 Refreshing every {} minutes, Ctrl-C to stop",
        config.refresh.interval_minutes
    );

    let mut last_digest = None;
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    let changed = last_digest.as_ref() != Some(&update.digest);
                    println!(
                        "[{}] cycle {}: {} items ({:?}){}",
                        update.completed_at.format("%H:%M:%S"),
                        update.cycle,
                        update.item_count,
                        update.origin,
                        if changed { "" } else { ", unchanged" }
                    );
                    last_digest = Some(update.digest);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} refresh updates", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    refresher.stop();
    Ok(())
}

pub async fn save(config: &Config, owner: &str, item_id: u64, category: Category) -> Result<()> {
    let store = open_records(config)?;
    store
        .insert(RetentionRecord::new(owner, item_id, category, SystemClock.now()))
        .await?;

    println!("✅ Saved item {} as {}", item_id, category);
    Ok(())
}

pub async fn move_item(config: &Config, owner: &str, item_id: u64, from: Category, to: Category) -> Result<()> {
    let store = open_records(config)?;
    let key = RecordKey {
        owner_id: owner.to_string(),
        item_id,
        category: from,
    };
    let moved = store.relocate(&key, to, SystemClock.now()).await?;

    println!(
        "✅ Moved item {} from {} to {} (saved {})",
        item_id,
        from,
        to,
        moved.saved_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

pub async fn remove(config: &Config, owner: &str, item_id: u64, category: Category) -> Result<()> {
    let store = open_records(config)?;
    let key = RecordKey {
        owner_id: owner.to_string(),
        item_id,
        category,
    };

    if !store.remove(&key).await? {
        return Err(Error::NotFound(format!("Item {} is not {} for {}", item_id, category, owner)));
    }

    println!("🗑️  Removed item {} from {}", item_id, category);
    Ok(())
}

pub async fn list(config: &Config, owner: Option<&str>) -> Result<()> {
    let store = open_records(config)?;
    let records = store.list(owner).await?;

    if records.is_empty() {
        println!("No saved items.");
        return Ok(());
    }

    println!("{:<12} {:<10} {:<10} {}", "ITEM", "CATEGORY", "OWNER", "SAVED");
    for record in &records {
        println!(
            "{:<12} {:<10} {:<10} {}",
            record.item_id,
            record.category,
            record.owner_id,
            record.saved_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    println!("\n{} saved items", records.len());
    Ok(())
}

pub async fn cleanup(config: &Config, json: bool) -> Result<()> {
    let service = open_cleanup(config)?;
    let report = service.trigger_manual().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.success {
        println!("🧹 {} in {}ms", report.summary(), report.duration_ms);
    } else {
        println!("❌ Cleanup failed: {}", report.error.as_deref().unwrap_or("unknown error"));
    }

    if report.success {
        Ok(())
    } else {
        Err(Error::Storage(report.error.unwrap_or_default()))
    }
}

pub async fn expiring(config: &Config) -> Result<()> {
    let service = open_cleanup(config)?;
    let counts = service.expiring_soon(SystemClock.now()).await?;
    let warnings = service.policy().warnings();

    println!("⏳ Expiring soon");
    for (category, count) in &counts {
        println!(
            "   {:<10} {} within {} days",
            category.as_str(),
            count,
            warnings.window(*category).num_days()
        );
    }
    Ok(())
}

pub async fn daemon(config: &Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = Arc::new(open_pipeline(config)?);
    let refresher = BackgroundRefresher::new(pipeline, clock.clone());
    let cleanup = RetentionCleanupService::new(
        open_records(config)?,
        RetentionPolicy::from_settings(&config.retention)?,
        clock,
    );

    refresher.start(config.refresh.interval())?;
    cleanup.schedule(config.retention.daily_time()?)?;
    info!(
        "news-shelf daemon running: refresh every {} minutes, cleanup daily at {}",
        config.refresh.interval_minutes, config.retention.daily_at
    );

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    refresher.stop();
    cleanup.stop_schedule();
    Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
    info!("Showing status");
    let now = SystemClock.now();

    println!("📊 news-shelf status");
    println!("====================");

    let config_file = get_config_file(None)?;
    if config_file.exists() {
        println!("✅ Configuration: {}", config_file.display());
    } else {
        println!("⚠️  Configuration: defaults (run 'news-shelf init')");
    }
    let names: Vec<&str> = config.sources.iter().map(|s| s.name.as_str()).collect();
    println!("   Sources: {}", names.join(" → "));

    let cache = open_cache(config)?;
    match cache.get().await {
        Some(entry) => {
            let age = cache.age(&entry, now);
            let state = if cache.is_fresh(&entry, now) {
                "fresh"
            } else if cache.is_stale(&entry, now) {
                "expired"
            } else {
                "outdated"
            };
            println!(
                "📦 Cache: {} items, {} minutes old ({})",
                entry.items.len(),
                age.num_minutes(),
                state
            );
        }
        None => println!("📦 Cache: empty"),
    }

    let service = open_cleanup(config)?;
    let records = open_records(config)?.list(None).await?;
    println!("💾 Saved items: {}", records.len());
    for category in Category::ALL {
        let count = records.iter().filter(|r| r.category == category).count();
        println!(
            "   {:<10} {} (kept {} days)",
            category.as_str(),
            count,
            service.policy().window(category).num_days()
        );
    }

    let expiring = service.expiring_soon(now).await?;
    let total: usize = expiring.values().sum();
    if total > 0 {
        println!("⏳ {} saved items expire soon (see 'news-shelf expiring')", total);
    }

    Ok(())
}

/// Generate shell completions
pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let cmd_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, cmd_name, &mut std::io::stdout());
}

/// Initialize logging. The returned guard must be kept alive while file
/// logging is in use.
pub fn init_logging(debug: bool, verbose: bool, logging: Option<&LoggingConfig>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else if let Some(logging) = logging {
        EnvFilter::try_new(&logging.level)
            .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", logging.level, e)))?
    } else {
        EnvFilter::new("warn")
    };

    let json = logging.is_some_and(|l| l.json_format);
    let (writer, guard) = match logging.filter(|l| l.log_to_file) {
        Some(logging) => {
            let path = Path::new(&logging.log_file);
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::Config(format!("Invalid log file '{}'", logging.log_file)))?;
            fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        // A subscriber is already installed, e.g. under tests.
        debug!("Logging already initialized: {}", e);
    }

    debug!("Logging initialized");
    Ok(guard)
}

fn get_config_file(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => Ok(Config::config_dir()?.join("config.toml")),
    }
}

fn open_cache(config: &Config) -> Result<Arc<CacheStore>> {
    let backend = FileBackend::new(config.cache_file()?)?;
    let policy = CachePolicy::new(config.cache.ttl()?, config.cache.stale_after()?)?;
    Ok(Arc::new(CacheStore::new(Arc::new(backend), policy)))
}

fn open_pipeline(config: &Config) -> Result<FetchPipeline> {
    FetchPipeline::from_config(config, open_cache(config)?)
}

fn open_records(config: &Config) -> Result<Arc<dyn RecordStore>> {
    Ok(Arc::new(FileRecordStore::new(config.records_file()?)?))
}

fn open_cleanup(config: &Config) -> Result<RetentionCleanupService> {
    Ok(RetentionCleanupService::new(
        open_records(config)?,
        RetentionPolicy::from_settings(&config.retention)?,
        Arc::new(SystemClock),
    ))
}

fn print_retrieval(result: &Retrieval) {
    match (&result.origin, &result.notice) {
        (Origin::Fresh, _) => match &result.source {
            Some(source) => println!("📰 Top stories (fetched from {})", source),
            None => println!("📰 Top stories (cached)"),
        },
        (_, Some(Notice::Outdated { fetched_at, expired })) => {
            println!(
                "⚠️  Offline: showing stories from {}{}",
                fetched_at.format("%Y-%m-%d %H:%M UTC"),
                if *expired { " (very old)" } else { "" }
            );
        }
        (_, _) => println!("⚠️  Offline and nothing cached yet"),
    }
    println!();

    for (i, item) in result.items.iter().enumerate() {
        println!("{:>3}. {}", i + 1, item.to_text());
    }
}
