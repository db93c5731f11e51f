//! Client entry point: wires the layout, sequencer and log unit together and
//! hands out stream views.

mod address_space;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::config::RuntimeOptions;
use crate::layout::{Layout, StaticLayout};
use crate::logunit::LogUnit;
use crate::retry::RetryPolicy;
use crate::sequencer::Sequencer;
use crate::stream::{AddressResolver, BackpointerResolver, ScanResolver, StreamView};
use crate::traits::{
    CorfuResult, LayoutService, LogUnitResult, LogUnitService, SequencerService, StreamResult,
};
use crate::types::{GlobalAddress, LogRecord, ReadResult, StreamId};

pub use address_space::{AddressSpaceView, ReadCache};

pub struct LogRuntime {
    layout_service: Arc<dyn LayoutService>,
    epoch: AtomicU64,
    sequencer: Arc<dyn SequencerService>,
    space: Arc<AddressSpaceView>,
    resolver: Arc<dyn AddressResolver>,
    retry: RetryPolicy,
    options: RuntimeOptions,
}

impl LogRuntime {
    /// Fetches the current layout and builds a runtime on top of the given
    /// services.
    pub async fn connect(
        layout_service: Arc<dyn LayoutService>,
        sequencer: Arc<dyn SequencerService>,
        log_unit: Arc<dyn LogUnitService>,
        options: RuntimeOptions,
    ) -> CorfuResult<Self> {
        let layout = layout_service.current_layout().await?;
        info!(
            "Connected at epoch {}: sequencer {}, log units {:?}, replication {}",
            layout.epoch, layout.sequencer, layout.log_units, layout.replication
        );

        let retry = RetryPolicy::new(options.retry.clone());
        let cache = options
            .cache_enabled
            .then(|| ReadCache::new(options.cache_capacity));
        let space = Arc::new(AddressSpaceView::new(
            log_unit,
            cache,
            retry.clone(),
            options.hole_fill_grace,
            options.hole_fill_poll,
        ));
        let resolver: Arc<dyn AddressResolver> = if options.backpointers_enabled {
            Arc::new(BackpointerResolver)
        } else {
            Arc::new(ScanResolver)
        };

        Ok(Self {
            layout_service,
            epoch: AtomicU64::new(layout.epoch),
            sequencer,
            space,
            resolver,
            retry,
            options,
        })
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Re-fetches the layout. Views keep working across an epoch bump; the
    /// change is only recorded.
    pub async fn refresh_layout(&self) -> CorfuResult<Layout> {
        let layout = self.layout_service.current_layout().await?;
        let previous = self.epoch.swap(layout.epoch, Ordering::AcqRel);
        if layout.epoch != previous {
            warn!(
                "Layout epoch changed from {} to {}: sequencer {}, log units {:?}",
                previous, layout.epoch, layout.sequencer, layout.log_units
            );
        }
        Ok(layout)
    }

    pub fn stream(&self, name: &str) -> StreamView {
        self.stream_by_id(StreamId::from_name(name))
    }

    pub fn stream_by_id(&self, id: StreamId) -> StreamView {
        StreamView::new(
            id,
            self.epoch(),
            self.sequencer.clone(),
            self.space.clone(),
            self.retry.clone(),
            self.resolver.clone(),
        )
    }

    pub fn sequencer(&self) -> &Arc<dyn SequencerService> {
        &self.sequencer
    }

    pub fn address_space(&self) -> &Arc<AddressSpaceView> {
        &self.space
    }

    pub async fn read(&self, address: GlobalAddress) -> LogUnitResult<ReadResult> {
        self.space.read(address).await
    }

    pub async fn fill_hole(&self, address: GlobalAddress) -> LogUnitResult<()> {
        self.space.fill_hole(address).await
    }

    /// Reads `address`, filling it with a hole if it stays undecided past
    /// the grace period.
    pub async fn read_decided(&self, address: GlobalAddress) -> StreamResult<LogRecord> {
        self.space.read_decided(address, None).await
    }
}

/// A sequencer, a log unit and a static layout in one process.
#[derive(Clone)]
pub struct LocalLog {
    pub sequencer: Arc<Sequencer>,
    pub log_unit: Arc<LogUnit>,
    pub layout: Arc<StaticLayout>,
    options: RuntimeOptions,
}

impl LocalLog {
    pub fn new(options: RuntimeOptions) -> CorfuResult<Self> {
        let log_unit = LogUnit::open(options.log_unit.clone())?;
        Ok(Self {
            sequencer: Arc::new(Sequencer::new(options.sequencer.clone())),
            log_unit: Arc::new(log_unit),
            layout: Arc::new(StaticLayout::new(Layout::single("local"))),
            options,
        })
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub async fn runtime(&self) -> CorfuResult<LogRuntime> {
        self.runtime_with(self.options.clone()).await
    }

    pub async fn runtime_with(&self, options: RuntimeOptions) -> CorfuResult<LogRuntime> {
        LogRuntime::connect(
            self.layout.clone(),
            self.sequencer.clone(),
            self.log_unit.clone(),
            options,
        )
        .await
    }

    /// Rebuilds the sequencer from the log unit, as after a sequencer restart.
    pub async fn recover_sequencer(&self, streams: &[StreamId]) -> CorfuResult<()> {
        self.sequencer
            .recover(self.log_unit.as_ref(), streams)
            .await?;
        Ok(())
    }
}
