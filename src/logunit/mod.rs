//! Write-once storage of the shared address space.
//!
//! A `LogUnit` is the single source of truth for what is at a global
//! address. Every address is decided at most once, either as data or as a
//! hole, and the first decision wins.
//!
//! # Module Structure
//!
//! - `entry`: persisted decision header and body
//! - `segment`: append-only decision file with replay

mod entry;
mod segment;


use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::LogUnitOptions;
use crate::error::{ErrorHandler, ErrorSeverity, LogUnitError, StorageError};
use crate::traits::{LogUnitResult, LogUnitService};
use crate::types::{GlobalAddress, LogRecord, ReadResult, StreamId};

pub use entry::{DecisionRecord, ENTRY_HEADER_SIZE, ENTRY_MAGIC_NUM, EntryHeader, EntryKind};
pub use segment::RecordSegment;

/// Tracks the highest address below which everything is decided.
#[derive(Debug, Default)]
struct ContiguousTracker {
    /// First address not known to be part of the decided prefix
    next: GlobalAddress,
    /// Decided addresses above `next`
    pending: BTreeSet<GlobalAddress>,
}

impl ContiguousTracker {
    fn decide(&mut self, address: GlobalAddress) {
        if address < self.next {
            return;
        }
        if address != self.next {
            self.pending.insert(address);
            return;
        }
        self.next += 1;
        while self.pending.remove(&self.next) {
            self.next += 1;
        }
    }

    fn tail(&self) -> Option<GlobalAddress> {
        self.next.checked_sub(1)
    }
}

pub struct LogUnit {
    shards: Vec<RwLock<HashMap<GlobalAddress, LogRecord>>>,
    // stream -> decided data addresses, rebuildable from the shards
    stream_index: RwLock<HashMap<StreamId, BTreeSet<GlobalAddress>>>,
    contiguous: Mutex<ContiguousTracker>,
    global_tail: AtomicU64,
    segment: Option<Mutex<RecordSegment>>,
    sync_on_write: bool,
    failed: AtomicBool,
}

impl LogUnit {
    /// Creates an empty in-memory log unit. `data_dir` is ignored.
    pub fn new(options: LogUnitOptions) -> Self {
        let shard_count = options.shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| RwLock::new(HashMap::new())).collect(),
            stream_index: RwLock::new(HashMap::new()),
            contiguous: Mutex::new(ContiguousTracker::default()),
            global_tail: AtomicU64::new(0),
            segment: None,
            sync_on_write: options.sync_on_write,
            failed: AtomicBool::new(false),
        }
    }

    /// Opens a log unit, replaying the segment in `data_dir` if one is set.
    pub fn open(options: LogUnitOptions) -> LogUnitResult<Self> {
        let segment_path = options.segment_path();
        let mut unit = Self::new(options);

        let Some(path) = segment_path else {
            return Ok(unit);
        };

        let mut segment = RecordSegment::open(&path).map_err(|e| {
            error!("Failed to open record segment {:?}: {}", path, e);
            e
        })?;
        let decisions = segment.replay().map_err(|e| {
            error!("Failed to replay record segment {:?}: {}", path, e);
            e
        })?;

        let count = decisions.len();
        for decision in decisions {
            if decision.address == GlobalAddress::MAX {
                warn!("Skipping decision at out of range address {}", decision.address);
                continue;
            }
            if unit.contains(decision.address) {
                warn!(
                    "Duplicate decision for address {} in segment, keeping the first",
                    decision.address
                );
                continue;
            }
            unit.apply(decision.address, decision.record);
        }
        unit.segment = Some(Mutex::new(segment));

        info!(
            "Opened log unit at {:?}: {} decisions, global tail {}",
            path,
            count,
            unit.tail()
        );
        Ok(unit)
    }

    fn shard(&self, address: GlobalAddress) -> &RwLock<HashMap<GlobalAddress, LogRecord>> {
        &self.shards[(address % self.shards.len() as u64) as usize]
    }

    fn contains(&self, address: GlobalAddress) -> bool {
        self.shard(address).read().contains_key(&address)
    }

    fn check_failed(&self) -> LogUnitResult<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(LogUnitError::Failed);
        }
        Ok(())
    }

    fn on_storage_error(&self, e: StorageError) -> LogUnitError {
        if e.severity() == ErrorSeverity::Fatal {
            error!(
                "[FATAL] storage failure: {} - log unit refuses further operations",
                e.context()
            );
            self.failed.store(true, Ordering::Release);
        }
        LogUnitError::Storage(e)
    }

    /// Updates the in-memory state for a decision that has been persisted.
    fn apply(&self, address: GlobalAddress, record: LogRecord) {
        self.index_record(address, &record);
        self.shard(address).write().insert(address, record);
        self.mark_decided(address);
    }

    fn index_record(&self, address: GlobalAddress, record: &LogRecord) {
        if record.is_hole() {
            return;
        }
        let mut index = self.stream_index.write();
        for stream in record.streams() {
            index.entry(*stream).or_default().insert(address);
        }
    }

    // `address` is below `u64::MAX`, checked by `decide` and by replay
    fn mark_decided(&self, address: GlobalAddress) {
        self.contiguous.lock().decide(address);
        self.global_tail.fetch_max(address + 1, Ordering::AcqRel);
    }

    /// The write-once rule shared by `write` and `fill_hole`.
    fn decide(&self, address: GlobalAddress, record: LogRecord) -> LogUnitResult<()> {
        self.check_failed()?;
        if address == GlobalAddress::MAX {
            return Err(LogUnitError::AddressOverflow(address));
        }
        let is_hole = record.is_hole();

        let mut shard = self.shard(address).write();
        if shard.contains_key(&address) {
            return Err(if is_hole {
                LogUnitError::AlreadyDecided(address)
            } else {
                LogUnitError::Overwrite(address)
            });
        }

        // Appending under the shard guard keeps the segment in decision
        // order, at the cost of serializing durable decisions.
        if let Some(segment) = &self.segment {
            segment
                .lock()
                .append(address, &record, self.sync_on_write)
                .map_err(|e| self.on_storage_error(e))?;
        }

        self.index_record(address, &record);
        shard.insert(address, record);
        drop(shard);
        self.mark_decided(address);

        if is_hole {
            debug!("Decided hole at {}", address);
        } else {
            debug!("Decided data at {}", address);
        }
        Ok(())
    }

    pub fn write_record(&self, address: GlobalAddress, record: LogRecord) -> LogUnitResult<()> {
        if record.is_hole() {
            return self.decide_hole(address).map_err(|e| match e {
                LogUnitError::AlreadyDecided(addr) => LogUnitError::Overwrite(addr),
                other => other,
            });
        }
        self.decide(address, record)
    }

    pub fn decide_hole(&self, address: GlobalAddress) -> LogUnitResult<()> {
        self.decide(address, LogRecord::hole())
    }

    pub fn read_record(&self, address: GlobalAddress) -> LogUnitResult<ReadResult> {
        self.check_failed()?;
        Ok(match self.shard(address).read().get(&address) {
            Some(record) => ReadResult::Decided(record.clone()),
            None => ReadResult::Empty,
        })
    }

    /// One past the highest decided address.
    pub fn tail(&self) -> GlobalAddress {
        self.global_tail.load(Ordering::Acquire)
    }

    pub fn contiguous(&self) -> Option<GlobalAddress> {
        self.contiguous.lock().tail()
    }

    pub fn last_of(&self, stream: &StreamId) -> Option<GlobalAddress> {
        self.stream_index
            .read()
            .get(stream)
            .and_then(|addrs| addrs.last().copied())
    }

    pub fn last_of_each(&self) -> Vec<(StreamId, GlobalAddress)> {
        self.stream_index
            .read()
            .iter()
            .filter_map(|(stream, addrs)| addrs.last().map(|last| (*stream, *last)))
            .collect()
    }

    /// Decided data addresses of `stream` at or above `from`, ascending.
    pub fn stream_addresses(&self, stream: &StreamId, from: GlobalAddress) -> Vec<GlobalAddress> {
        self.stream_index
            .read()
            .get(stream)
            .map(|addrs| addrs.range(from..).copied().collect())
            .unwrap_or_default()
    }

    pub fn stream_contains(&self, stream: &StreamId, address: GlobalAddress) -> bool {
        self.stream_index
            .read()
            .get(stream)
            .is_some_and(|addrs| addrs.contains(&address))
    }

    pub fn is_hole(&self, address: GlobalAddress) -> bool {
        self.shard(address)
            .read()
            .get(&address)
            .is_some_and(|record| record.is_hole())
    }

    /// Discards the stream index and rebuilds it from the decided addresses.
    ///
    /// Every shard stays read locked until the new index is in place, so a
    /// concurrent decision lands either in the scan or after the swap.
    pub fn rebuild_stream_index(&self) {
        let shards: Vec<_> = self.shards.iter().map(|shard| shard.read()).collect();

        let mut rebuilt: HashMap<StreamId, BTreeSet<GlobalAddress>> = HashMap::new();
        for shard in &shards {
            for (address, record) in shard.iter() {
                if record.is_hole() {
                    continue;
                }
                for stream in record.streams() {
                    rebuilt.entry(*stream).or_default().insert(*address);
                }
            }
        }
        let streams = rebuilt.len();
        *self.stream_index.write() = rebuilt;
        drop(shards);

        info!("Rebuilt stream index for {} streams", streams);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LogUnitService for LogUnit {
    async fn write(&self, address: GlobalAddress, record: LogRecord) -> LogUnitResult<()> {
        self.write_record(address, record)
    }

    async fn read(&self, address: GlobalAddress) -> LogUnitResult<ReadResult> {
        self.read_record(address)
    }

    async fn fill_hole(&self, address: GlobalAddress) -> LogUnitResult<()> {
        self.decide_hole(address)
    }

    async fn global_tail(&self) -> LogUnitResult<GlobalAddress> {
        self.check_failed()?;
        Ok(self.tail())
    }

    async fn stream_tail(&self, stream: &StreamId) -> LogUnitResult<Option<GlobalAddress>> {
        self.check_failed()?;
        Ok(self.last_of(stream))
    }

    async fn stream_tails(&self) -> LogUnitResult<Vec<(StreamId, GlobalAddress)>> {
        self.check_failed()?;
        Ok(self.last_of_each())
    }

    async fn contiguous_tail(&self) -> LogUnitResult<Option<GlobalAddress>> {
        self.check_failed()?;
        Ok(self.contiguous())
    }
}
