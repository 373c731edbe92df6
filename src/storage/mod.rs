pub mod gallery;
pub mod ledger;

pub use gallery::{Gallery, GalleryEntry};
pub use ledger::{AttendanceLedger, AttendanceRecord, RecordOutcome};
