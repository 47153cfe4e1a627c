use std::path::PathBuf;

use crate::autosave::AutosaveConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub autosave: AutosaveConfig,
}

impl AppConfig {
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("localnote.db")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            autosave: AutosaveConfig::default(),
        }
    }
}
