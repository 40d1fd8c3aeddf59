//! Where Astra keeps its files.
//!
//! The data directory is `<config dir>/astra-voice/data`, where the config
//! dir is `%APPDATA%` on Windows, `~/Library/Application Support` on macOS
//! and `$XDG_CONFIG_HOME` (or `~/.config`) elsewhere. `ASTRA_DATA_DIR`
//! replaces the whole path.

use std::ffi::OsString;
use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "ASTRA_DATA_DIR";

pub fn get_data_dir() -> PathBuf {
    data_dir_from(std::env::var_os(DATA_DIR_ENV))
}

/// Rolling log files live under the data directory.
pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

fn data_dir_from(override_dir: Option<OsString>) -> PathBuf {
    match override_dir.filter(|d| !d.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => config_base().join("astra-voice").join("data"),
    }
}

fn config_base() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}
