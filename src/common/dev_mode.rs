use std::path::PathBuf;
use std::fs;
use directories::ProjectDirs;
use crate::common::config::Config;
use crate::common::error::Result;
use crate::common::paths;

/// Decides where the kiosk keeps its ledger, analytics and caches.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        let base_dir = if enabled {
            PathBuf::from("./dev_data")
        } else {
            ProjectDirs::from("com", "attendsup", "AttendSup")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(paths::system_data_dir)
        };

        Self::with_base_dir(enabled, base_dir)
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        fs::create_dir_all(base_dir.join("analytics"))?;
        fs::create_dir_all(base_dir.join("cache"))?;

        if enabled {
            println!("📁 Development mode enabled - data will be saved to: {}",
                     base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.clone()
    }

    pub fn ledger_path(&self, config: &Config) -> PathBuf {
        config.ledger.path.clone()
            .unwrap_or_else(|| self.base_dir.join("attendance.csv"))
    }

    pub fn analytics_path(&self, config: &Config) -> PathBuf {
        config.analytics.output_path.clone()
            .unwrap_or_else(|| self.base_dir.join("analytics").join("emotion_analytics.png"))
    }

    pub fn gallery_cache_path(&self, config: &Config) -> PathBuf {
        config.gallery.cache_file.clone()
            .unwrap_or_else(|| self.base_dir.join("cache").join("gallery.bincode"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_paths_win_over_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dev = DevMode::with_base_dir(true, dir.path().to_path_buf()).unwrap();

        let mut config = Config::default();
        assert_eq!(dev.ledger_path(&config), dir.path().join("attendance.csv"));

        config.ledger.path = Some(PathBuf::from("/tmp/elsewhere.csv"));
        assert_eq!(dev.ledger_path(&config), PathBuf::from("/tmp/elsewhere.csv"));
        assert!(dir.path().join("analytics").is_dir());
    }
}
