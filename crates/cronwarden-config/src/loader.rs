//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Load an explicit file, or the default file if it exists, or defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default = Self::default_path();
        if default.exists() {
            Self::load(&default)
        } else {
            Ok(Config::default())
        }
    }

    /// `~/.cronwarden/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cronwarden")
            .join("config.toml")
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.cronwarden`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }

    fn expand_paths(config: &mut Config) {
        for path in [
            &mut config.store.path,
            &mut config.logging.directory,
            &mut config.approvals.path,
        ] {
            if let Some(text) = path.to_str() {
                *path = PathBuf::from(Self::expand_path(text));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 15);
        assert_eq!(config.store.backend, "file");
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            [store]
            backend = "memory"

            [scheduler]
            tick_interval_secs = 5
            max_concurrent_triggers = 2

            [gating]
            approval_poll_secs = 30

            [logging]
            level = "debug"
            file_enabled = false

            [calendars.us-bank]
            dates = ["2024-07-04", "2024-12-25"]
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.scheduler.tick_interval_secs, 5);
        assert_eq!(config.scheduler.max_concurrent_triggers, 2);
        assert_eq!(config.gating.approval_poll_secs, 30);
        assert_eq!(config.gating.dependency_retry_secs, 60);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.file_enabled);
        assert_eq!(config.calendars["us-bank"].dates.len(), 2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]").unwrap();
        writeln!(file, "max_concurrent_triggers = 9").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.scheduler.max_concurrent_triggers, 9);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/cronwarden.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_tilde_paths_expanded() {
        let config = ConfigLoader::load_str(
            r#"
            [store]
            path = "~/jobs"
            "#,
        )
        .unwrap();
        assert!(!config.store.path.starts_with("~"));
        assert!(config.store.path.ends_with("jobs"));
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-only variable name, not read anywhere else
        unsafe {
            std::env::set_var("CRONWARDEN_TEST_STORE", "/srv/cronwarden");
        }
        let content = "[store]\npath = \"${CRONWARDEN_TEST_STORE}\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/srv/cronwarden"));
        unsafe {
            std::env::remove_var("CRONWARDEN_TEST_STORE");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${CRONWARDEN_UNSET_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_path_no_tilde() {
        assert_eq!(ConfigLoader::expand_path("/usr/local/bin"), "/usr/local/bin");
    }
}
