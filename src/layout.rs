use std::fmt::{self, Display};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::traits::{CorfuResult, LayoutService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationScheme {
    Chain,
    Quorum,
}

impl Display for ReplicationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationScheme::Chain => write!(f, "Chain"),
            ReplicationScheme::Quorum => write!(f, "Quorum"),
        }
    }
}

/// Which sequencer and log units serve the log in a given epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub epoch: u64,
    pub sequencer: String,
    pub log_units: Vec<String>,
    pub replication: ReplicationScheme,
}

impl Layout {
    pub fn single(endpoint: &str) -> Self {
        Self {
            epoch: 0,
            sequencer: endpoint.to_string(),
            log_units: vec![endpoint.to_string()],
            replication: ReplicationScheme::Chain,
        }
    }
}

/// A layout that only changes when told to; stands in for the consensus
/// service in tests and single-process deployments.
pub struct StaticLayout {
    layout: RwLock<Layout>,
}

impl StaticLayout {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout: RwLock::new(layout),
        }
    }

    pub fn bump_epoch(&self) -> u64 {
        let mut layout = self.layout.write();
        layout.epoch += 1;
        info!("Layout epoch bumped to {}", layout.epoch);
        layout.epoch
    }

    /// Installs new endpoints under the next epoch.
    pub fn reconfigure(&self, sequencer: String, log_units: Vec<String>) -> Layout {
        let mut layout = self.layout.write();
        layout.epoch += 1;
        layout.sequencer = sequencer;
        layout.log_units = log_units;
        info!(
            "Layout reconfigured at epoch {}: sequencer {}, log units {:?}",
            layout.epoch, layout.sequencer, layout.log_units
        );
        layout.clone()
    }
}

#[async_trait]
impl LayoutService for StaticLayout {
    async fn current_layout(&self) -> CorfuResult<Layout> {
        Ok(self.layout.read().clone())
    }
}
