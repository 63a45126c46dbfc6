use std::fs;
use std::path::Path;

use crate::models::config::TransportConfiguration;
use crate::models::error::TransportError;

/// Load a configuration from a JSON settings file.
///
/// Missing fields take their defaults. The result is validated.
pub fn load_settings(path: &Path) -> Result<TransportConfiguration, TransportError> {
    let json = fs::read_to_string(path).map_err(|e| {
        TransportError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
    })?;
    let config: TransportConfiguration = serde_json::from_str(&json).map_err(|e| {
        TransportError::ConfigurationFailed(format!("failed to parse settings: {}", e))
    })?;
    config
        .validate()
        .map_err(TransportError::ConfigurationFailed)?;
    Ok(config)
}

/// Persist a configuration as pretty-printed JSON, creating the directory.
pub fn save_settings(config: &TransportConfiguration, path: &Path) -> Result<(), TransportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TransportError::StorageError(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| TransportError::StorageError(format!("failed to serialize settings: {}", e)))?;
    fs::write(path, json)
        .map_err(|e| TransportError::StorageError(format!("failed to write settings: {}", e)))
}
