use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::evaluation::extract::BlockSelection;
use crate::evaluation::scoring::WeightTable;

/// On-disk settings. Every field is optional; missing ones fall back to
/// built-in defaults. Unknown keys (e.g. transport timeouts) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BenchSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_weights: Option<WeightTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_selection: Option<BlockSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimeoutSettings {
    /// Seconds; fractions allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<f64>,
    /// Seconds; fractions allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax_timeout: Option<f64>,
}

pub fn load_settings(path: &Path) -> BenchSettings {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring invalid settings file {:?}: {}", path, e);
                BenchSettings::default()
            }
        },
        Err(_) => {
            debug!("No settings file at {:?}, using defaults", path);
            BenchSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &BenchSettings) {
    match serde_json::to_string_pretty(settings) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to save settings to {:?}: {}", path, e);
            }
        }
        Err(e) => {
            warn!("Failed to serialize settings: {}", e);
        }
    }
}
