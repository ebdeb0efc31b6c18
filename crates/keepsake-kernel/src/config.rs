//! Configuration loading from `~/.keepsake/config.toml` with defaults.

use keepsake_types::config::{keepsake_home, MemoryConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load memory configuration from a TOML file, with defaults.
///
/// A missing, unreadable, or malformed file never fails startup: every
/// problem is logged and the defaults are used instead.
pub fn load_config(path: Option<&Path>) -> MemoryConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return MemoryConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            return MemoryConfig::default();
        }
    };

    match toml::from_str::<MemoryConfig>(&contents) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            sanitize(config)
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to parse config, using defaults"
            );
            MemoryConfig::default()
        }
    }
}

/// Clamp values that would make the memory layer misbehave.
fn sanitize(mut config: MemoryConfig) -> MemoryConfig {
    if config.trigger_floor > 100 {
        warn!(
            trigger_floor = config.trigger_floor,
            "trigger_floor above 100 would hide every trigger, clamping"
        );
        config.trigger_floor = 100;
    }
    if config.decay_interval_secs == 0 {
        warn!("decay_interval_secs must be positive, using 86400");
        config.decay_interval_secs = 86_400;
    }
    if config.store_timeout_ms == 0 {
        warn!("store_timeout_ms must be positive, using 1500");
        config.store_timeout_ms = 1_500;
    }
    config
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    keepsake_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/keepsake.toml")));
        assert_eq!(config, MemoryConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "log_level = \"debug\"").unwrap();
        writeln!(f, "recent_in_context = 3").unwrap();
        writeln!(f, "database_path = \"/tmp/ks/test.db\"").unwrap();
        drop(f);

        let config = load_config(Some(&path));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.recent_in_context, 3);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/ks/test.db"));
        assert_eq!(config.trigger_floor, 20);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "trigger_floor = \"high\"").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.trigger_floor, 20);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "trigger_floor = 250\ndecay_interval_secs = 0").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.trigger_floor, 100);
        assert_eq!(config.decay_interval_secs, 86_400);
    }

    #[test]
    fn test_default_path_is_under_home() {
        assert!(default_config_path().ends_with(".keepsake/config.toml"));
    }
}
