//! System level controls driven by hand gestures.

pub mod backlight;
pub mod command;

pub use backlight::SysfsBacklight;
pub use command::CommandControl;

use crate::common::config::{BrightnessBackend, DeviceConfig};
use crate::core::capabilities::{DisabledControl, LevelControl};

/// Build the volume control, falling back to a no-op when none is configured.
pub fn volume_control(config: &DeviceConfig) -> Box<dyn LevelControl> {
    match CommandControl::new("volume", &config.volume_command) {
        Some(control) => Box::new(control),
        None => {
            tracing::warn!("No volume command configured; volume gestures are ignored");
            Box::new(DisabledControl("volume"))
        }
    }
}

/// Build the brightness control for the configured backend.
///
/// A backend that cannot be opened degrades to a no-op control.
pub fn brightness_control(config: &DeviceConfig) -> Box<dyn LevelControl> {
    match config.brightness_backend {
        BrightnessBackend::Sysfs => match SysfsBacklight::open(config.backlight_dir.as_deref()) {
            Ok(backlight) => Box::new(backlight),
            Err(e) => {
                tracing::warn!("Brightness control unavailable: {}", e);
                Box::new(DisabledControl("brightness"))
            }
        },
        BrightnessBackend::Command => match CommandControl::new("brightness", &config.brightness_command) {
            Some(control) => Box::new(control),
            None => {
                tracing::warn!("No brightness command configured");
                Box::new(DisabledControl("brightness"))
            }
        },
        BrightnessBackend::None => Box::new(DisabledControl("brightness")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_backends_fall_back_to_disabled() {
        let config = DeviceConfig {
            volume_command: Vec::new(),
            brightness_backend: BrightnessBackend::Sysfs,
            backlight_dir: Some("/nonexistent/backlight".into()),
            ..DeviceConfig::default()
        };
        assert!(volume_control(&config).set(50).is_ok());
        let brightness = brightness_control(&config);
        assert_eq!(brightness.name(), "brightness");
        assert!(brightness.set(50).is_ok());
    }
}
