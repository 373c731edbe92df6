pub mod app;
pub mod camera;
pub mod cli;
pub mod common;
pub mod core;
pub mod devices;
pub mod service;
pub mod storage;
pub mod vision;

pub use app::Kiosk;
pub use common::{Config, DevMode, KioskError, Result};
pub use core::{FrameOrchestrator, FrameReport, FrameTime, Identity};
pub use storage::AttendanceLedger;
