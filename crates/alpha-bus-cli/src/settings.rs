use std::fs;
use std::path::{Path, PathBuf};

use alpha_bus::BusConfig;
use anyhow::{Context, Result};

/// `<config dir>/AlphaBus/bus.json`.
pub fn default_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir()?;
    base.push("AlphaBus");
    base.push("bus.json");
    Some(base)
}

/// Loads the bus configuration. An explicit path must exist; the default
/// location is only read when present. Fields missing from the file keep
/// their environment-derived defaults.
pub fn load(explicit: Option<&Path>) -> Result<BusConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(BusConfig::default()),
        },
    };
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read bus config {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a valid bus config", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded bus config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_bus::WriterPolicy;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.json");
        fs::write(
            &path,
            r#"{ "segment_name": "studio-a", "writer_policy": "exclusive" }"#,
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.segment_name, "studio-a");
        assert_eq!(config.writer_policy, WriterPolicy::Exclusive);
        assert_eq!(config.attach_timeout_ms, BusConfig::default().attach_timeout_ms);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(err.to_string().contains("failed to read bus config"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.json");
        fs::write(&path, "{ segment_name = 1 }").unwrap();
        assert!(load(Some(&path)).is_err());
    }
}
