//! Configuration validation utilities.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Expand a leading `~` to `$HOME` and make the path absolute.
///
/// # Errors
/// Returns `ConfigError::IoError` if the current directory cannot be read.
pub fn expand_path(path: &str) -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let expanded = match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    };

    if expanded.is_absolute() {
        return Ok(expanded);
    }
    Ok(std::env::current_dir()?.join(strip_current(&expanded)))
}

fn strip_current(path: &Path) -> &Path {
    path.strip_prefix(".").unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("${INBOX_NONEXISTENT_TOKEN_12345:-fallback}");
        assert_eq!(result, "fallback");
        assert_eq!(expand_env_vars("plain-token"), "plain-token");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: This test only touches a test-specific variable.
        unsafe {
            std::env::set_var("INBOX_TEST_VAR_EXPAND", "secret_value");
        }
        assert_eq!(expand_env_vars("${INBOX_TEST_VAR_EXPAND}"), "secret_value");
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("INBOX_TEST_VAR_EXPAND");
        }
    }

    #[test]
    fn test_expand_path_absolute_unchanged() {
        assert_eq!(
            expand_path("/srv/inbox").unwrap(),
            PathBuf::from("/srv/inbox")
        );
    }

    #[test]
    fn test_expand_path_relative_made_absolute() {
        let path = expand_path("./data").unwrap();
        assert!(path.is_absolute());
        assert_eq!(path, std::env::current_dir().unwrap().join("data"));
    }

    #[test]
    fn test_expand_path_home() {
        let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
            return;
        };
        if !home.is_absolute() {
            return;
        }
        assert_eq!(expand_path("~").unwrap(), home);
        assert_eq!(expand_path("~/inbox").unwrap(), home.join("inbox"));
    }
}
