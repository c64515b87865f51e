pub mod chrome;
pub mod probe;
pub mod selectors;
pub mod traits;

pub use chrome::ChromePortal;
pub use probe::PageReport;
pub use selectors::DialogKind;
pub use traits::ExportPortal;
