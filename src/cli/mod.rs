pub mod analytics;
pub mod keys;
pub mod status;

pub use analytics::{export as export_analytics, AnalyticsExport};
pub use keys::{poll_command, KioskCommand, RawModeGuard};
pub use status::{render_status, status_line};
