//! Path resolution for cloudup
//!
//! # Environment Variables
//!
//! - `CLOUDUP_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `CLOUDUP_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/cloudup` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\cloudup`
//!    - macOS/Linux: `~/.local/state/cloudup`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "CLOUDUP_STATE_DIR";

/// File the in-memory cloud persists to
pub const STATE_FILE: &str = "cloud.json";

/// File the terraform target writes into the output directory
pub const TERRAFORM_FILE: &str = "kubernetes.tf.json";

/// Get the cloudup state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("cloudup");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("cloudup");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("cloudup");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// The cloud state file: `explicit` if given, else the default location
pub fn state_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(state_dir()?.join(STATE_FILE)),
    }
}

/// Expand `~` and environment variables in a path
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// Uses unsafe env::set_var/remove_var; only use in tests that don't read
    /// the same variables concurrently.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    /// Helper to run a test with env var removed
    fn without_env_var<F, R>(key: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::remove_var(key) };
        let result = f();
        if let Some(v) = original {
            // SAFETY: Tests run in isolation
            unsafe { env::set_var(key, v) };
        }
        result
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            let result = state_dir().unwrap();
            assert_eq!(result, PathBuf::from("/custom/state/path"));
            assert_eq!(
                state_file(None).unwrap(),
                PathBuf::from("/custom/state/path/cloud.json")
            );
        });
    }

    #[test]
    fn test_xdg_state_home() {
        without_env_var(ENV_STATE_DIR, || {
            with_env_var("XDG_STATE_HOME", "/tmp/xdg-state-test", || {
                let result = state_dir().unwrap();
                assert_eq!(result, PathBuf::from("/tmp/xdg-state-test/cloudup"));
            });
        });
    }

    #[test]
    fn test_explicit_state_file_wins() {
        let home = dirs::home_dir().unwrap();
        let result = state_file(Some(Path::new("~/clusters/demo.json"))).unwrap();
        assert_eq!(result, home.join("clusters").join("demo.json"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_default_state_dir_unix() {
        without_env_var(ENV_STATE_DIR, || {
            without_env_var("XDG_STATE_HOME", || {
                let result = state_dir().unwrap();
                let home = dirs::home_dir().unwrap();
                assert_eq!(result, home.join(".local").join("state").join("cloudup"));
            });
        });
    }
}
