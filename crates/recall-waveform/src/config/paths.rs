//! Standard locations for waveform configuration

use std::path::PathBuf;

/// Application directory under the platform config dir
///
/// Returns: `<config_dir>/recall` (falls back to `./recall` when the platform
/// has no config dir, e.g. a stripped-down CI container)
pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recall")
}

/// Returns: `<config_dir>/recall/waveform.yaml`
pub fn default_config_path() -> PathBuf {
    app_config_dir().join("waveform.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("recall/waveform.yaml"));
        assert!(path.starts_with(app_config_dir()));
    }
}
