//! ani-dl binary: composition root and CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ani_dl::adapters::{
    DownloaderClient, MetadataProvider, Notifier, QbitClient, TorrentSource, TvdbClient,
    WebhookNotifier,
};
use ani_dl::ai::{AiCaller, AiTrace, FileRenamer, SubtitleMatcher, TitleParser};
use ani_dl::api::{self, ApiState};
use ani_dl::breaker::CircuitBreaker;
use ani_dl::config::{AiTaskConfig, Config};
use ani_dl::db::Database;
use ani_dl::error::{Error, Result};
use ani_dl::hardlink::HardlinkService;
use ani_dl::keypool::{KeyPool, KeySpec};
use ani_dl::orchestrator::{DownloadOrchestrator, OrchestratorParts, install_queue_handlers};
use ani_dl::queue::{QueueWorker, RssPayload, RssQueue, WebhookQueue, rss_events};
use ani_dl::rss::RssFetcher;
use ani_dl::rss_scheduler::RssScheduler;
use ani_dl::types::{Category, MediaType, TorrentHash};

#[derive(Parser)]
#[command(name = "ani-dl", about = "Anime download orchestrator", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Validate the configuration and adapter connectivity, then exit
    #[arg(long)]
    test: bool,

    /// Verbose logging plus a JSON trace of every AI call
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator: queues, scheduler and webhook surface (default)
    Serve,
    /// Process one RSS feed now and exit
    Rss {
        /// Feed URL
        url: String,
    },
    /// Submit a magnet by info hash
    Magnet {
        /// 40-hex info hash
        hash: String,
        /// Library title
        title: String,
        /// Fansub/encoder group
        group: String,
        /// Season number
        #[arg(long, default_value_t = 1)]
        season: u32,
        /// tv or movie
        #[arg(long, default_value = "tv")]
        category: String,
    },
    /// Submit a .torrent file
    Torrent {
        /// Path to the .torrent file
        file: PathBuf,
        /// Library title
        title: String,
        /// Fansub/encoder group
        group: String,
        /// Season number
        #[arg(long, default_value_t = 1)]
        season: u32,
        /// tv or movie
        #[arg(long, default_value = "tv")]
        category: String,
    },
}

/// Everything the commands need, wired once
struct App {
    config: Arc<Config>,
    db: Database,
    orchestrator: Arc<DownloadOrchestrator>,
    webhook_queue: WebhookQueue,
    rss_queue: RssQueue,
    pools: Vec<Arc<KeyPool>>,
    breakers: Vec<Arc<CircuitBreaker>>,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ani_dl={default_level},info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Turn a task config into pool key specs (`key_pool` wins over `api_key`)
fn build_key_specs(prefix: &str, task: &AiTaskConfig) -> Vec<KeySpec> {
    if !task.key_pool.is_empty() {
        return task
            .key_pool
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.enabled && !entry.api_key.is_empty())
            .map(|(idx, entry)| KeySpec {
                key_id: format!("{prefix}_key_{idx}"),
                name: if entry.name.is_empty() {
                    format!("Key {}", idx + 1)
                } else {
                    entry.name.clone()
                },
                api_key: entry.api_key.clone(),
                base_url: task.base_url.clone(),
                model: task.model.clone(),
                rpm_limit: entry.rpm,
                rpd_limit: entry.rpd,
                enabled: true,
            })
            .collect();
    }

    match task.api_key.as_deref() {
        Some(api_key) if !api_key.is_empty() => vec![KeySpec {
            key_id: format!("{prefix}_key_0"),
            name: "Primary Key".to_string(),
            api_key: api_key.to_string(),
            base_url: task.base_url.clone(),
            model: task.model.clone(),
            rpm_limit: 0,
            rpd_limit: 0,
            enabled: true,
        }],
        _ => Vec::new(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn build_caller(
    purpose: &'static str,
    prefix: &str,
    task: &AiTaskConfig,
    config: &Config,
    db: &Database,
    notifier: Arc<dyn Notifier>,
    trace: Option<Arc<AiTrace>>,
    pools: &mut Vec<Arc<KeyPool>>,
    breakers: &mut Vec<Arc<CircuitBreaker>>,
) -> Result<AiCaller> {
    let pool = Arc::new(KeyPool::with_limits(purpose, config.ai.rate_limits.clone()));
    let keys = build_key_specs(prefix, task);
    if keys.is_empty() {
        tracing::warn!(purpose, "no API keys configured");
    }
    pool.configure(keys);

    // Restore persisted budget/disable state so a restart neither resets RPD
    // accounting nor resurrects banned credentials
    for snapshot in db.get_key_usage(purpose).await? {
        pool.restore_usage(
            &snapshot.key_id,
            snapshot.rpd_count.max(0) as u32,
            &snapshot.rpd_date,
            snapshot.disabled,
            snapshot.disabled_reason.as_deref(),
        );
    }

    // Disables persist immediately (so they outlive the process) and go out
    // on the download channel
    {
        let db = db.clone();
        let notifier = notifier.clone();
        pool.set_on_key_disabled(Box::new(move |key_id, key_name, reason| {
            let db = db.clone();
            let notifier = notifier.clone();
            let key_id = key_id.to_string();
            let key_name = key_name.to_string();
            let reason = reason.to_string();
            tokio::spawn(async move {
                let snapshot = ani_dl::db::KeyUsageSnapshot {
                    purpose: purpose.to_string(),
                    key_id,
                    rpd_count: 0,
                    rpd_date: String::new(),
                    disabled: true,
                    disabled_reason: Some(reason.clone()),
                };
                if let Err(e) = db.upsert_key_usage(&snapshot).await {
                    tracing::warn!(error = %e, "failed to persist key disable");
                }
                notifier
                    .send(
                        "download",
                        vec![ani_dl::adapters::Embed::new(
                            "API key disabled",
                            format!("[{purpose}] {key_name}: {reason}"),
                        )
                        .color(0xE74C3C)],
                        None,
                    )
                    .await;
            });
        }));
    }

    let breaker = Arc::new(CircuitBreaker::new(purpose));
    let caller = AiCaller::new(
        purpose,
        pool.clone(),
        breaker.clone(),
        task,
        config.ai.rate_limits.breaker_open_seconds,
        trace,
    )?;

    pools.push(pool);
    breakers.push(breaker);
    Ok(caller)
}

/// Flush per-key budget snapshots on shutdown
async fn persist_pool_snapshots(db: &Database, pools: &[Arc<KeyPool>]) {
    for pool in pools {
        let status = pool.get_status();
        for key in &status.keys {
            let snapshot = ani_dl::db::KeyUsageSnapshot {
                purpose: status.purpose.clone(),
                key_id: key.key_id.clone(),
                rpd_count: key.rpd_count as i64,
                rpd_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
                disabled: key.disabled,
                disabled_reason: key.disabled_reason.clone(),
            };
            if let Err(e) = db.upsert_key_usage(&snapshot).await {
                tracing::warn!(error = %e, "failed to persist key usage snapshot");
            }
        }
    }
}

async fn build_app(config: Config, debug: bool) -> Result<App> {
    let config = Arc::new(config);
    let db = Database::new(&config.persistence.database_path).await?;

    let trace = (debug || config.ai_processing.debug_trace).then(|| {
        Arc::new(AiTrace::new(
            config.ai_processing.trace_dir.clone(),
            config.ai_processing.trace_max_files,
        ))
    });

    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(config.notifications.clone()));

    let mut pools = Vec::new();
    let mut breakers = Vec::new();

    let title_caller = build_caller(
        "title_parse",
        "tp",
        &config.ai.title_parse,
        &config,
        &db,
        notifier.clone(),
        trace.clone(),
        &mut pools,
        &mut breakers,
    )
    .await?;
    let rename_caller = build_caller(
        "multi_file_rename",
        "rn",
        &config.ai.multi_file_rename,
        &config,
        &db,
        notifier.clone(),
        trace.clone(),
        &mut pools,
        &mut breakers,
    )
    .await?;
    let subtitle_caller = build_caller(
        "subtitle_match",
        "sm",
        &config.ai.subtitle_match,
        &config,
        &db,
        notifier.clone(),
        trace,
        &mut pools,
        &mut breakers,
    )
    .await?;

    let title_parser = Arc::new(TitleParser::new(
        title_caller,
        &config.ai_processing.language_priority,
    ));
    let file_renamer = Arc::new(FileRenamer::new(
        rename_caller,
        config.ai_processing.max_batch_size,
        config.ai_processing.batch_processing_retries,
    ));
    let subtitle_matcher = Arc::new(SubtitleMatcher::new(subtitle_caller));

    let downloader: Arc<dyn DownloaderClient> =
        Arc::new(QbitClient::new(config.downloader.clone())?);
    let metadata: Option<Arc<dyn MetadataProvider>> =
        if config.tvdb.enabled && !config.tvdb.api_key.is_empty() {
            Some(Arc::new(TvdbClient::new(config.tvdb.clone())?))
        } else {
            None
        };

    let hardlinks = HardlinkService::new(
        db.clone(),
        config.library.clone(),
        config.path_conversion.clone(),
    );

    let orchestrator = DownloadOrchestrator::new(OrchestratorParts {
        db: db.clone(),
        downloader,
        metadata,
        notifier,
        title_parser,
        file_renamer,
        subtitle_matcher,
        hardlinks,
        config: config.clone(),
    });

    let webhook_queue: WebhookQueue = QueueWorker::with_name("WebhookQueue");
    let rss_queue: RssQueue = QueueWorker::with_name("RSSQueue");
    let fetcher = Arc::new(RssFetcher::new()?);

    install_queue_handlers(orchestrator.clone(), &webhook_queue, &rss_queue, fetcher);

    Ok(App {
        config,
        db,
        orchestrator,
        webhook_queue,
        rss_queue,
        pools,
        breakers,
    })
}

async fn run_serve(app: App) -> Result<()> {
    let cancel = CancellationToken::new();

    app.webhook_queue.start().await;
    app.rss_queue.start().await;

    let scheduler = RssScheduler::new(
        app.config.clone(),
        app.rss_queue.clone(),
        cancel.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    let bind = &app.config.webhook;
    let addr: std::net::SocketAddr = format!("{}:{}", bind.host, bind.port)
        .parse()
        .map_err(|e| Error::Config {
            message: format!("invalid webhook bind address: {e}"),
            key: Some("webhook".into()),
        })?;
    let api_state = ApiState {
        webhook_queue: app.webhook_queue.clone(),
        rss_queue: app.rss_queue.clone(),
        pools: app.pools.clone(),
        breakers: app.breakers.clone(),
    };
    let api_handle = tokio::spawn(api::serve(api_state, addr, cancel.clone()));

    tracing::info!("ani-dl running; press Ctrl+C to stop");
    ani_dl::run_until_shutdown(cancel).await;

    scheduler_handle.await.ok();
    if let Ok(Err(e)) = api_handle.await {
        tracing::error!(error = %e, "webhook surface exited with error");
    }
    app.rss_queue.stop().await;
    app.webhook_queue.stop().await;
    persist_pool_snapshots(&app.db, &app.pools).await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn run_rss(app: App, url: String) -> Result<()> {
    app.rss_queue.start().await;
    app.rss_queue.enqueue(
        rss_events::MANUAL_CHECK,
        RssPayload::Feed(ani_dl::queue::FeedCheck {
            rss_url: url,
            trigger_type: "manual".to_string(),
            filter: Default::default(),
        }),
    );

    // Wait until the queue drains (expansion plus every item)
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = app.rss_queue.status().await;
        if status.queue_len == 0 && status.current_event.is_none() {
            break;
        }
    }

    let status = app.rss_queue.status().await;
    println!(
        "processed {} events ({} ok, {} failed)",
        status.stats.total_processed, status.stats.total_success, status.stats.total_failed
    );
    app.rss_queue.stop().await;

    if status.stats.total_failed > 0 {
        Err(Error::Other("one or more feed events failed".into()))
    } else {
        Ok(())
    }
}

async fn run_magnet(
    app: App,
    hash: String,
    title: String,
    group: String,
    season: u32,
    category: String,
) -> Result<()> {
    let hash = TorrentHash::parse(&hash)?;
    let magnet = format!("magnet:?xt=urn:btih:{}", hash.as_str());

    app.orchestrator
        .submit_manual(
            TorrentSource::Url(magnet),
            &hash,
            &title,
            &group,
            season,
            Category::from_str_lossy(&category),
            MediaType::Anime,
        )
        .await?;

    println!("submitted {} ({title})", hash.as_str());
    Ok(())
}

async fn run_torrent(
    app: App,
    file: PathBuf,
    title: String,
    group: String,
    season: u32,
    category: String,
) -> Result<()> {
    let bytes = std::fs::read(&file)?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.torrent")
        .to_string();

    // The info hash only becomes visible once the downloader has parsed the
    // file: submit first, then find the new torrent in the listing
    app.orchestrator
        .submit_torrent_file_untracked(&bytes, &file_name)
        .await?;

    let hash = app
        .orchestrator
        .find_hash_by_name_hint(&title, &file_name)
        .await?;

    match hash {
        Some(hash) => {
            app.orchestrator
                .submit_manual(
                    TorrentSource::File {
                        file_name,
                        bytes,
                    },
                    &hash,
                    &title,
                    &group,
                    season,
                    Category::from_str_lossy(&category),
                    MediaType::Anime,
                )
                .await?;
            println!("submitted {} ({title})", hash.as_str());
        }
        None => {
            println!("torrent handed to the downloader; tracking starts on its added webhook");
        }
    }
    Ok(())
}

async fn run_self_test(config: &Config) -> Result<()> {
    println!("configuration: ok");

    let db = Database::new(&config.persistence.database_path).await?;
    println!("database: ok ({})", config.persistence.database_path.display());
    db.close().await;

    let qbit = QbitClient::new(config.downloader.clone())?;
    match qbit.login().await {
        Ok(()) => println!("downloader: ok ({})", config.downloader.base_url),
        Err(e) => println!("downloader: FAILED ({e})"),
    }

    if config.tvdb.enabled {
        let tvdb = TvdbClient::new(config.tvdb.clone())?;
        match tvdb.search_series("test").await {
            Ok(_) => println!("tvdb: ok"),
            Err(e) => println!("tvdb: FAILED ({e})"),
        }
    } else {
        println!("tvdb: disabled");
    }

    for (name, task) in [
        ("title_parse", &config.ai.title_parse),
        ("multi_file_rename", &config.ai.multi_file_rename),
        ("subtitle_match", &config.ai.subtitle_match),
    ] {
        if task.has_keys() {
            println!("ai.{name}: {} key(s) configured", {
                if task.key_pool.is_empty() {
                    1
                } else {
                    task.key_pool.iter().filter(|k| k.enabled).count()
                }
            });
        } else {
            println!("ai.{name}: no keys configured");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.test {
        return match run_self_test(&config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let result = async {
        let app = build_app(config, cli.debug).await?;
        match cli.command.unwrap_or(Command::Serve) {
            Command::Serve => run_serve(app).await,
            Command::Rss { url } => run_rss(app, url).await,
            Command::Magnet {
                hash,
                title,
                group,
                season,
                category,
            } => run_magnet(app, hash, title, group, season, category).await,
            Command::Torrent {
                file,
                title,
                group,
                season,
                category,
            } => run_torrent(app, file, title, group, season, category).await,
        }
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
