use std::path::PathBuf;

// System-wide locations used when not running in dev mode

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/attendsup")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/attendsup/kiosk.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/attendsup/models")
}
