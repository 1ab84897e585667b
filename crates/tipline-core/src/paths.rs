use crate::error::{Result, TiplineError};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "tipline";
pub const APP_NAME: &str = "tipline";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_dir) = std::env::var("TIPLINE_DATA_DIR") {
        return Ok(PathBuf::from(override_dir));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| TiplineError::NotFound("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Directory for artefacts that must never end up in a backup.
pub fn no_backup_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("no_backup")
}

pub fn blob_path(data_dir: &Path, namespace: &str) -> PathBuf {
    no_backup_dir(data_dir).join(format!("tipline_{namespace}.persist"))
}

pub fn records_path(data_dir: &Path, namespace: &str) -> PathBuf {
    no_backup_dir(data_dir).join(format!("tipline_{namespace}_records.json"))
}

pub fn public_data_path(data_dir: &Path, namespace: &str) -> PathBuf {
    data_dir.join(format!("tipline_{namespace}_public.json"))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.json")
}
