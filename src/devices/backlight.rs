use crate::common::{KioskError, Result};
use crate::core::capabilities::LevelControl;
use std::fs;
use std::path::{Path, PathBuf};

const BACKLIGHT_CLASS: &str = "/sys/class/backlight";

/// Display brightness through the kernel backlight interface.
pub struct SysfsBacklight {
    dir: PathBuf,
    max_brightness: u32,
}

impl SysfsBacklight {
    /// Open `dir`, or the first device under `/sys/class/backlight` when unset.
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => first_device(Path::new(BACKLIGHT_CLASS))?,
        };

        let raw = fs::read_to_string(dir.join("max_brightness")).map_err(|e| {
            KioskError::Device(format!("No backlight at {}: {}", dir.display(), e))
        })?;
        let max_brightness = raw.trim().parse::<u32>().map_err(|e| {
            KioskError::Device(format!("Bad max_brightness in {}: {}", dir.display(), e))
        })?;
        if max_brightness == 0 {
            return Err(KioskError::Device(format!("Backlight {} reports zero range", dir.display())));
        }

        tracing::info!("Using backlight {} (max {})", dir.display(), max_brightness);
        Ok(Self { dir, max_brightness })
    }

    fn raw_level(&self, percent: u8) -> u32 {
        let percent = u64::from(percent.min(100));
        ((percent * u64::from(self.max_brightness) + 50) / 100) as u32
    }
}

impl LevelControl for SysfsBacklight {
    fn name(&self) -> &str {
        "brightness"
    }

    fn set(&self, percent: u8) -> Result<()> {
        let path = self.dir.join("brightness");
        fs::write(&path, self.raw_level(percent).to_string())
            .map_err(|e| KioskError::Device(format!("Failed to write {}: {}", path.display(), e)))
    }
}

fn first_device(class_dir: &Path) -> Result<PathBuf> {
    let mut devices: Vec<PathBuf> = fs::read_dir(class_dir)
        .map_err(|e| KioskError::Device(format!("Cannot list {}: {}", class_dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    devices.sort();
    devices
        .into_iter()
        .next()
        .ok_or_else(|| KioskError::Device(format!("No backlight device in {}", class_dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_device(max: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("max_brightness"), max).unwrap();
        fs::write(dir.path().join("brightness"), "0").unwrap();
        dir
    }

    #[test]
    fn percent_is_scaled_to_device_range() {
        let dir = fake_device("937\n");
        let backlight = SysfsBacklight::open(Some(dir.path())).unwrap();
        backlight.set(50).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("brightness")).unwrap(), "469");
        backlight.set(100).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("brightness")).unwrap(), "937");
    }

    #[test]
    fn invalid_device_is_rejected() {
        let dir = fake_device("0");
        assert!(matches!(SysfsBacklight::open(Some(dir.path())), Err(KioskError::Device(_))));
        let empty = tempfile::tempdir().unwrap();
        assert!(first_device(empty.path()).is_err());
    }
}
