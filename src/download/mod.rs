pub mod controller;
pub mod watcher;

pub use controller::{FetchSettings, MonthlyFetcher, RunOutcome};
pub use watcher::DownloadWatcher;
