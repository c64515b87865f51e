mod config;
mod download;
mod models;
mod normalize;
mod portal;
mod progress;
mod upload;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{parse_categories, Config};
use download::{DownloadWatcher, FetchSettings, MonthlyFetcher, RunOutcome};
use models::{Category, YearMonth};
use portal::{ChromePortal, ExportPortal, PageReport};
use progress::ProgressStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "realtrade-scout", version, about = "Monthly real-estate transaction exports from the MOLIT portal")]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download every month not yet recorded in the progress file
    Run(RunArgs),
    /// Show the last completed month per category
    Status,
    /// Normalize a downloaded spreadsheet into CSV
    Normalize {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report the export page's tabs, inputs and buttons
    Probe {
        #[arg(long)]
        category: Option<Category>,
        /// Also save page HTML and a screenshot here
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Upload everything in the output directory to the configured target
    Sync,
}

#[derive(Args)]
struct RunArgs {
    /// Comma-separated category labels, e.g. "아파트,오피스텔"
    #[arg(long)]
    categories: Option<String>,
    /// First month to fetch (YYYYMM)
    #[arg(long)]
    start: Option<YearMonth>,
    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let cfg = Config::from_env()?;

    match cli.command {
        Command::Run(args) => run(cfg, args).await,
        Command::Status => status(&cfg),
        Command::Normalize { input, output } => normalize_file(&input, output),
        Command::Probe { category, dump } => probe(cfg, category, dump).await,
        Command::Sync => sync(&cfg).await,
    }
}

async fn run(mut cfg: Config, args: RunArgs) -> Result<()> {
    if let Some(list) = args.categories {
        cfg.categories = parse_categories(&list)?;
    }
    if let Some(start) = args.start {
        cfg.start_month = start;
    }
    if args.headful {
        cfg.headless = false;
    }

    info!("🏠 Real-estate transaction export");
    info!("Categories: {}", cfg.categories.iter().map(|c| c.label()).collect::<Vec<_>>().join(", "));
    info!("Months from {} into {}", cfg.start_month, cfg.output_dir.display());

    let mut progress = ProgressStore::load(&cfg.progress_file)?;
    let uploader = upload::from_target(&cfg.upload)?;

    let launch_cfg = cfg.clone();
    let chrome = tokio::task::spawn_blocking(move || ChromePortal::launch(&launch_cfg))
        .await
        .context("Browser launch panicked")??;

    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, finishing current month");
                stop.store(true, Ordering::SeqCst);
            }
        }
    });

    let watcher = DownloadWatcher::new(&cfg.temp_dir, cfg.poll_interval, cfg.download_timeout);
    let today = chrono::Local::now().date_naive();
    let fetcher = MonthlyFetcher::new(&chrome, uploader.as_ref(), watcher, FetchSettings::from(&cfg), today)
        .with_stop_flag(stop);

    let report = fetcher.run(&mut progress).await?;

    for cat in &report.categories {
        println!(
            "{:<12} downloaded {:>3}  no data {:>3}  existing {:>3}  failed {:>3}  last {}",
            cat.category.label(),
            cat.downloaded.len(),
            cat.no_data.len(),
            cat.existing.len(),
            cat.failed.len(),
            cat.last_completed.map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
        );
    }

    match report.outcome {
        RunOutcome::Completed => info!("✅ Run complete"),
        RunOutcome::DailyLimitReached { category, month } => {
            warn!("Daily download limit hit at {} {}; run again tomorrow to resume", category, month)
        }
        RunOutcome::Interrupted => warn!("Run interrupted; progress saved"),
    }
    Ok(())
}

fn status(cfg: &Config) -> Result<()> {
    let progress = ProgressStore::load(&cfg.progress_file)?;
    let today = chrono::Local::now().date_naive();

    for &category in &cfg.categories {
        let pending = download::controller::pending_months(&progress, &cfg.output_dir, category, cfg.start_month, today);
        println!(
            "{:<12} last {:<7} pending {:>4}  next {}",
            category.label(),
            progress.last_completed(category).map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
            pending.len(),
            pending.first().map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

fn normalize_file(input: &Path, output: Option<PathBuf>) -> Result<()> {
    let table = normalize::read_table(input)?;
    let table = normalize::normalize(&table);
    let output = output.unwrap_or_else(|| input.with_extension("csv"));
    normalize::write_csv(&table, &output)?;
    info!("💾 Wrote {} rows to {}", table.rows.len(), output.display());
    Ok(())
}

async fn probe(cfg: Config, category: Option<Category>, dump: Option<PathBuf>) -> Result<()> {
    let launch_cfg = cfg.clone();
    let chrome = tokio::task::spawn_blocking(move || ChromePortal::launch(&launch_cfg))
        .await
        .context("Browser launch panicked")??;

    chrome.open().await?;
    if let Some(category) = category {
        chrome.select_category(category).await?;
    }

    let html = chrome.page_html().await?;
    let report = PageReport::from_html(&html);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.missing_tabs.is_empty() {
        warn!("Tabs not found on page: {}", report.missing_tabs.join(", "));
    }
    if report.export_candidates.is_empty() {
        warn!("No export button candidates found");
    }
    if let Some(dir) = dump {
        chrome.dump_debug(&dir, "export_page").await?;
    }
    Ok(())
}

async fn sync(cfg: &Config) -> Result<()> {
    let uploader = upload::from_target(&cfg.upload)?;
    info!("Syncing {} to {}", cfg.output_dir.display(), uploader.name());

    let mut count = 0;
    let mut folders: Vec<_> = std::fs::read_dir(&cfg.output_dir)
        .with_context(|| format!("Cannot read {}", cfg.output_dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    folders.sort_by_key(|e| e.file_name());

    for folder in folders {
        let folder_name = folder.file_name().to_string_lossy().into_owned();
        let mut files: Vec<PathBuf> = std::fs::read_dir(folder.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("xlsx" | "csv")))
            .collect();
        files.sort();

        for path in files {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            match uploader.upload(&path, &folder_name, &name).await {
                Ok(status) => {
                    info!("{}/{}: {:?}", folder_name, name, status);
                    count += 1;
                }
                Err(e) => warn!("{}/{}: {:#}", folder_name, name, e),
            }
        }
    }
    info!("💾 Processed {} files", count);
    Ok(())
}
