//! Configuration loading from `~/.relay/config.toml` with defaults.

use relay_types::config::RelayConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load configuration from a TOML file, with defaults.
///
/// A missing, unreadable or malformed file is not an error: it is logged
/// and the defaults are used.
pub fn load_config(path: Option<&Path>) -> RelayConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<RelayConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    RelayConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    relay_home().join("config.toml")
}

/// Get the default Relay home directory.
pub fn relay_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".relay")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::config::DEFAULT_MAX_MESSAGE_SIZE;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
log_level = "debug"
max_message_size = 4096

[mappings]
"mojo:echo" = "mojo:echo_server"
"#
        )
        .unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_message_size, 4096);
        assert_eq!(config.mappings["mojo:echo"], "mojo:echo_server");
    }

    #[test]
    fn test_malformed_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = [not toml").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_default_path_is_under_relay_home() {
        assert!(default_config_path().starts_with(relay_home()));
        assert!(default_config_path().ends_with(".relay/config.toml"));
    }
}
