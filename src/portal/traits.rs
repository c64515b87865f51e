use crate::models::{Category, MonthRange};
use anyhow::Result;
use async_trait::async_trait;

/// Operations the fetch loop needs from the transaction portal.
/// Lets the loop run against a scripted fake in tests.
#[async_trait]
pub trait ExportPortal: Send + Sync {
    /// Load the export page and get it ready for input
    async fn open(&self) -> Result<()>;

    /// Switch to the tab for a property category
    async fn select_category(&self, category: Category) -> Result<()>;

    /// Fill the search form's from/to dates
    async fn set_date_range(&self, range: MonthRange) -> Result<()>;

    /// Click the spreadsheet export button
    async fn trigger_export(&self) -> Result<()>;

    /// Messages of JS dialogs shown since the last call
    async fn take_dialogs(&self) -> Result<Vec<String>>;
}
