use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CorfuError;
use crate::traits::CorfuResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerOptions {
    /// Start in the NotReady state until `recover` has run.
    pub require_recovery: bool,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            require_recovery: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogUnitOptions {
    /// Number of independently locked address shards
    pub shard_count: usize,
    /// Directory for the record segment, `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Whether to sync after each decision
    pub sync_on_write: bool,
}

impl Default for LogUnitOptions {
    fn default() -> Self {
        Self {
            shard_count: 16,
            data_dir: None,
            sync_on_write: true,
        }
    }
}

impl LogUnitOptions {
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    pub fn segment_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("records.log"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// `None` retries until the caller cancels
    pub max_attempts: Option<u32>,
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// Adds up to 50% random jitter to each backoff
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Follow backpointer chains when reading; linear scan otherwise.
    pub backpointers_enabled: bool,
    /// Cache decided addresses on the client.
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    /// How long a reader waits on an undecided address before filling it.
    #[serde(with = "duration_ms")]
    pub hole_fill_grace: Duration,
    /// Re-read interval while waiting out the grace period.
    #[serde(with = "duration_ms")]
    pub hole_fill_poll: Duration,
    pub retry: RetryOptions,
    pub sequencer: SequencerOptions,
    pub log_unit: LogUnitOptions,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            backpointers_enabled: true,
            cache_enabled: false,
            cache_capacity: 4096,
            hole_fill_grace: Duration::from_millis(10),
            hole_fill_poll: Duration::from_millis(1),
            retry: RetryOptions::default(),
            sequencer: SequencerOptions::default(),
            log_unit: LogUnitOptions::default(),
        }
    }
}

impl RuntimeOptions {
    pub fn from_json_str(s: &str) -> CorfuResult<Self> {
        serde_json::from_str(s).map_err(|e| CorfuError::Config(e.to_string()))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CorfuResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CorfuError::Config(format!("read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&content)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
