use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Environment variable overriding [`BusConfig::segment_name`].
pub const SEGMENT_ENV: &str = "ALPHA_BUS_SEGMENT";
/// Environment variable overriding [`BusConfig::directory`].
pub const DIR_ENV: &str = "ALPHA_BUS_DIR";

/// Default segment name. The layout version is part of the name so builds
/// with different layouts do not meet on the same object.
pub const DEFAULT_SEGMENT_NAME: &str = "alpha-bus-v1";

/// How registrations on one channel interact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterPolicy {
    /// Any number of sources may register; the count is informational and
    /// concurrent writers race on the channel.
    #[default]
    Shared,
    /// A channel accepts one registered source at a time; later
    /// registrations are refused until it unregisters.
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub segment_name: String,
    /// Directory holding the backing object. `None` picks `/dev/shm` when
    /// available and the temp directory otherwise.
    pub directory: Option<PathBuf>,
    pub writer_policy: WriterPolicy,
    /// How long an attaching process waits for a concurrent creator to
    /// finish initialising the segment.
    pub attach_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            segment_name: std::env::var(SEGMENT_ENV)
                .ok()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_SEGMENT_NAME.to_string()),
            directory: std::env::var_os(DIR_ENV).map(PathBuf::from),
            writer_policy: WriterPolicy::Shared,
            attach_timeout_ms: 500,
        }
    }
}

impl BusConfig {
    /// Config for a segment living in `directory`, ignoring the environment.
    pub fn in_directory(directory: impl Into<PathBuf>, segment_name: impl Into<String>) -> Self {
        Self {
            segment_name: segment_name.into(),
            directory: Some(directory.into()),
            writer_policy: WriterPolicy::Shared,
            attach_timeout_ms: 500,
        }
    }

    pub fn with_writer_policy(mut self, policy: WriterPolicy) -> Self {
        self.writer_policy = policy;
        self
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    /// Location of the backing object.
    pub fn segment_path(&self) -> Result<PathBuf, BusError> {
        let name = self.segment_name.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(BusError::InvalidName(self.segment_name.clone()));
        }
        let directory = match &self.directory {
            Some(directory) => directory.clone(),
            None => default_directory(),
        };
        Ok(directory.join(name))
    }
}

fn default_directory() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_path_joins_directory_and_name() {
        let config = BusConfig::in_directory("/tmp/bus-test", "alpha");
        assert_eq!(
            config.segment_path().unwrap(),
            PathBuf::from("/tmp/bus-test/alpha")
        );
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["", "..", "a/b", "nested\\name"] {
            let config = BusConfig::in_directory("/tmp", name);
            assert!(matches!(
                config.segment_path(),
                Err(BusError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: BusConfig =
            serde_json::from_str(r#"{ "writer_policy": "exclusive", "attach_timeout_ms": 20 }"#)
                .unwrap();
        assert_eq!(config.writer_policy, WriterPolicy::Exclusive);
        assert_eq!(config.attach_timeout(), Duration::from_millis(20));
        assert!(!config.segment_name.is_empty());
    }
}
