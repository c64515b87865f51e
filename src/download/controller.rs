use crate::config::Config;
use crate::download::watcher::DownloadWatcher;
use crate::models::{months_to_fetch, Category, MonthRange, YearMonth};
use crate::normalize;
use crate::portal::{DialogKind, ExportPortal};
use crate::progress::ProgressStore;
use crate::upload::Uploader;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Knobs of the fetch loop, split out of [`Config`] so tests can build them directly
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub categories: Vec<Category>,
    pub start_month: YearMonth,
    pub output_dir: PathBuf,
    pub progress_file: PathBuf,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

impl From<&Config> for FetchSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            categories: cfg.categories.clone(),
            start_month: cfg.start_month,
            output_dir: cfg.output_dir.clone(),
            progress_file: cfg.progress_file.clone(),
            max_attempts: cfg.max_attempts.max(1),
            retry_delay: cfg.retry_delay,
            poll_interval: cfg.poll_interval,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// The portal refused further downloads today; progress up to here is saved
    DailyLimitReached { category: Category, month: YearMonth },
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub downloaded: Vec<YearMonth>,
    pub no_data: Vec<YearMonth>,
    pub existing: Vec<YearMonth>,
    pub failed: Vec<YearMonth>,
    pub already_done: usize,
    pub last_completed: Option<YearMonth>,
}

impl CategoryReport {
    fn new(category: Category) -> Self {
        Self {
            category,
            downloaded: Vec::new(),
            no_data: Vec::new(),
            existing: Vec::new(),
            failed: Vec::new(),
            already_done: 0,
            last_completed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub categories: Vec<CategoryReport>,
}

/// Result of one export click
#[derive(Debug)]
enum Attempt {
    Downloaded(PathBuf),
    NoData,
    DailyLimit,
}

/// Result of a month after all retries
#[derive(Debug)]
enum MonthResult {
    Downloaded(PathBuf),
    NoData,
    DailyLimit,
    Failed,
}

/// Walks categories and months, downloading each missing month with retries
/// and checkpointing progress after every completed month.
pub struct MonthlyFetcher<'a, P: ExportPortal> {
    portal: &'a P,
    uploader: &'a dyn Uploader,
    watcher: DownloadWatcher,
    settings: FetchSettings,
    today: NaiveDate,
    stop: Arc<AtomicBool>,
}

impl<'a, P: ExportPortal> MonthlyFetcher<'a, P> {
    pub fn new(
        portal: &'a P,
        uploader: &'a dyn Uploader,
        watcher: DownloadWatcher,
        settings: FetchSettings,
        today: NaiveDate,
    ) -> Self {
        Self {
            portal,
            uploader,
            watcher,
            settings,
            today,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between months; set it to stop the run early
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// `{output}/{folder}/{folder} {YYYYMM}.xlsx`
    pub fn destination(&self, category: Category, ym: YearMonth) -> PathBuf {
        destination(&self.settings.output_dir, category, ym)
    }

    pub async fn run(&self, progress: &mut ProgressStore) -> Result<RunReport> {
        let removed = self.watcher.clear()?;
        if removed > 0 {
            debug!(removed, "Cleared stale downloads");
        }
        self.portal.open().await?;

        let mut reports = Vec::new();
        for &category in &self.settings.categories {
            let mut report = CategoryReport::new(category);
            let outcome = self.run_category(category, progress, &mut report).await?;
            report.last_completed = progress.last_completed(category);
            info!(
                category = %category,
                downloaded = report.downloaded.len(),
                no_data = report.no_data.len(),
                existing = report.existing.len(),
                failed = report.failed.len(),
                last = ?report.last_completed.map(|m| m.to_string()),
                "Category finished"
            );
            reports.push(report);

            if outcome != RunOutcome::Completed {
                return Ok(RunReport { outcome, categories: reports });
            }
        }

        Ok(RunReport {
            outcome: RunOutcome::Completed,
            categories: reports,
        })
    }

    async fn run_category(
        &self,
        category: Category,
        progress: &mut ProgressStore,
        report: &mut CategoryReport,
    ) -> Result<RunOutcome> {
        // once a month fails, later months still run but the watermark stays put
        let mut gap = false;

        for ym in months_to_fetch(self.settings.start_month, self.today) {
            if self.stop.load(Ordering::SeqCst) {
                warn!("Stop requested, leaving the run");
                return Ok(RunOutcome::Interrupted);
            }
            if progress.is_complete(category, ym) {
                report.already_done += 1;
                continue;
            }

            let dest = self.destination(category, ym);
            if dest.exists() {
                debug!(file = %dest.display(), "Already on disk");
                report.existing.push(ym);
                if !gap {
                    self.checkpoint(progress, category, ym)?;
                }
                continue;
            }

            match self.fetch_month(category, ym).await {
                MonthResult::Downloaded(tmp) => {
                    self.store(category, ym, &tmp, &dest).await?;
                    report.downloaded.push(ym);
                }
                MonthResult::NoData => {
                    info!(category = %category, month = %ym, "No transactions for month");
                    report.no_data.push(ym);
                }
                MonthResult::DailyLimit => {
                    warn!(category = %category, month = %ym, "Daily download limit reached, stopping");
                    return Ok(RunOutcome::DailyLimitReached { category, month: ym });
                }
                MonthResult::Failed => {
                    error!(category = %category, month = %ym, "Giving up on month for this run");
                    report.failed.push(ym);
                    gap = true;
                    continue;
                }
            }

            if !gap {
                self.checkpoint(progress, category, ym)?;
            }
        }
        Ok(RunOutcome::Completed)
    }

    async fn fetch_month(&self, category: Category, ym: YearMonth) -> MonthResult {
        let max = self.settings.max_attempts;
        for attempt in 1..=max {
            info!(category = %category, month = %ym, attempt, max, "Downloading month");
            match self.attempt(category, ym).await {
                Ok(Attempt::Downloaded(path)) => return MonthResult::Downloaded(path),
                Ok(Attempt::NoData) => return MonthResult::NoData,
                Ok(Attempt::DailyLimit) => return MonthResult::DailyLimit,
                Err(e) => warn!(category = %category, month = %ym, attempt, error = %e, "Attempt failed"),
            }

            if attempt < max {
                tokio::time::sleep(self.settings.retry_delay).await;
                if let Err(e) = self.portal.open().await {
                    warn!(error = %e, "Failed to reload export page");
                }
            }
        }
        MonthResult::Failed
    }

    async fn attempt(&self, category: Category, ym: YearMonth) -> Result<Attempt> {
        let range = MonthRange::for_month(ym, self.today)?;
        self.portal.select_category(category).await?;
        self.portal.set_date_range(range).await?;
        // dialogs left over from the previous month must not be read as this month's
        let stale = self.portal.take_dialogs().await?;
        if !stale.is_empty() {
            debug!(?stale, "Discarded earlier dialogs");
        }

        // a late export from a failed month must not be picked up as this one
        let removed = self.watcher.clear()?;
        if removed > 0 {
            debug!(removed, "Discarded leftover downloads");
        }

        let before = self.watcher.snapshot()?;
        self.portal.trigger_export().await?;

        let outcome = tokio::select! {
            downloaded = self.watcher.wait_for_download(&before) => Attempt::Downloaded(downloaded?),
            dialog = self.watch_dialogs() => dialog?,
        };

        if let Attempt::Downloaded(path) = &outcome {
            if let Err(e) = check_contract_month(path, ym) {
                let _ = std::fs::remove_file(path);
                return Err(e);
            }
        }
        Ok(outcome)
    }

    /// Resolves once the page shows a dialog; never resolves if none appears
    async fn watch_dialogs(&self) -> Result<Attempt> {
        loop {
            for message in self.portal.take_dialogs().await? {
                match DialogKind::classify(&message) {
                    DialogKind::NoData => return Ok(Attempt::NoData),
                    DialogKind::DailyLimit => return Ok(Attempt::DailyLimit),
                    DialogKind::Other => bail!("Portal said: {message}"),
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Move the download into place, write the normalized CSV, push both
    async fn store(&self, category: Category, ym: YearMonth, tmp: &Path, dest: &Path) -> Result<()> {
        move_file(tmp, dest)?;
        info!(file = %dest.display(), "Saved spreadsheet");

        let folder = category.folder_name();
        let mut produced = vec![(dest.to_path_buf(), category.file_name(ym, "xlsx"))];

        let csv_name = category.file_name(ym, "csv");
        let csv_path = dest.with_file_name(&csv_name);
        match normalize::read_table(dest).map(|t| normalize::normalize(&t)) {
            Ok(table) => {
                normalize::write_csv(&table, &csv_path)?;
                debug!(rows = table.rows.len(), file = %csv_path.display(), "Wrote normalized table");
                produced.push((csv_path, csv_name));
            }
            Err(e) => warn!(file = %dest.display(), error = %e, "Could not normalize spreadsheet"),
        }

        for (path, name) in produced {
            match self.uploader.upload(&path, &folder, &name).await {
                Ok(status) => debug!(file = %name, ?status, target = self.uploader.name(), "Upload done"),
                // the file is on disk; `sync` can push it later
                Err(e) => warn!(file = %name, error = %e, target = self.uploader.name(), "Upload failed"),
            }
        }
        Ok(())
    }

    fn checkpoint(&self, progress: &mut ProgressStore, category: Category, ym: YearMonth) -> Result<()> {
        if progress.record(category, ym) {
            progress
                .save(&self.settings.progress_file)
                .context("Failed to save progress")?;
        }
        Ok(())
    }
}

pub fn destination(output_dir: &Path, category: Category, ym: YearMonth) -> PathBuf {
    output_dir
        .join(category.folder_name())
        .join(category.file_name(ym, "xlsx"))
}

/// Months of a category the next run would try, in order
pub fn pending_months(
    progress: &ProgressStore,
    output_dir: &Path,
    category: Category,
    start: YearMonth,
    today: NaiveDate,
) -> Vec<YearMonth> {
    months_to_fetch(start, today)
        .into_iter()
        .filter(|ym| !progress.is_complete(category, *ym))
        .filter(|ym| !destination(output_dir, category, *ym).exists())
        .collect()
}

/// Every row of an export must carry the requested `계약년월`. Files that
/// can't be parsed are let through; `store` reports them.
fn check_contract_month(path: &Path, ym: YearMonth) -> Result<()> {
    let table = match normalize::read_table(path) {
        Ok(table) => table,
        Err(e) => {
            debug!(file = %path.display(), error = %e, "Contract month not checked");
            return Ok(());
        }
    };
    let Some(idx) = table.column(normalize::CONTRACT_YYMM) else {
        return Ok(());
    };

    let expected = ym.to_string();
    if let Some(found) = table
        .rows
        .iter()
        .map(|r| r[idx].trim())
        .find(|v| !v.is_empty() && *v != expected)
    {
        bail!("Export holds contract month {found}, expected {expected}");
    }
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_err() {
        // rename fails across filesystems
        std::fs::copy(from, to)
            .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}
