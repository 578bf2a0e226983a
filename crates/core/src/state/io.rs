//! # IO Utilities
//!
//! File system helpers for the `.conductor` runtime directory and the
//! "never fail to start" persistence contract: persisted JSON that is
//! missing or corrupt degrades to a default value with one named warning.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Get the runtime directory path (.conductor)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("CONDUCTOR_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".conductor")
}

/// Why a persisted value fell back to its default
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Missing,
    Unreadable(String),
    Corrupt(String),
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "file does not exist"),
            Self::Unreadable(e) => write!(f, "file could not be read: {}", e),
            Self::Corrupt(e) => write!(f, "file is not valid JSON: {}", e),
        }
    }
}

/// Value loaded from disk, or the default plus the reason it was used
#[derive(Debug)]
pub enum Loaded<T> {
    Found(T),
    Defaulted(T, FallbackReason),
}

impl<T> Loaded<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Found(value) | Self::Defaulted(value, _) => value,
        }
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            Self::Found(_) => None,
            Self::Defaulted(_, reason) => Some(reason),
        }
    }
}

/// Load JSON from `path`, falling back to `T::default()`
///
/// A missing file is the normal first-run case and logs at debug; unreadable
/// or corrupt files log a single warning naming the fallback reason.
pub fn load_or_default<T>(path: &Path) -> Loaded<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No persisted state, using defaults");
        return Loaded::Defaulted(T::default(), FallbackReason::Missing);
    }

    let reason = match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => return Loaded::Found(value),
            Err(e) => FallbackReason::Corrupt(e.to_string()),
        },
        Err(e) => FallbackReason::Unreadable(e.to_string()),
    };

    tracing::warn!(path = %path.display(), reason = %reason, "Persisted state ignored, using defaults");
    Loaded::Defaulted(T::default(), reason)
}

/// Serialize `value` as pretty JSON, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let data = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
    std::fs::write(path, data).with_context(|| format!("Failed to write file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u32,
    }

    #[test]
    fn test_get_runtime_path() {
        if std::env::var("CONDUCTOR_RUNTIME_PATH").is_err() {
            assert!(get_runtime_path().ends_with(".conductor"));
        }
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempdir().unwrap();
        let loaded: Loaded<Sample> = load_or_default(&dir.path().join("nope.json"));
        assert_eq!(loaded.fallback_reason(), Some(&FallbackReason::Missing));
        assert_eq!(loaded.into_inner(), Sample::default());
    }

    #[test]
    fn test_corrupt_file_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded: Loaded<Sample> = load_or_default(&path);
        assert!(matches!(
            loaded.fallback_reason(),
            Some(FallbackReason::Corrupt(_))
        ));
        assert_eq!(loaded.into_inner(), Sample::default());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_json(&path, &Sample { count: 7 }).unwrap();

        let loaded: Loaded<Sample> = load_or_default(&path);
        assert!(loaded.fallback_reason().is_none());
        assert_eq!(loaded.into_inner(), Sample { count: 7 });
    }
}
