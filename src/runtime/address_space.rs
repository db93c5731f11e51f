use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LogUnitError, log_failure};
use crate::retry::{RetryPolicy, check_cancelled, sleep_or_cancel};
use crate::traits::{LogUnitResult, LogUnitService, StreamResult};
use crate::types::{GlobalAddress, LogRecord, ReadResult};

/// Client side cache of decided addresses. Decided values never change, so
/// entries are never invalidated, only evicted.
pub struct ReadCache {
    inner: Mutex<ReadCacheInner>,
}

struct ReadCacheInner {
    capacity: usize,
    entries: HashMap<GlobalAddress, LogRecord>,
    order: VecDeque<GlobalAddress>,
}

impl ReadCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ReadCacheInner {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, address: GlobalAddress) -> Option<LogRecord> {
        self.inner.lock().entries.get(&address).cloned()
    }

    pub fn insert(&self, address: GlobalAddress, record: LogRecord) {
        let mut inner = self.inner.lock();
        if inner.entries.insert(address, record).is_some() {
            return;
        }
        inner.order.push_back(address);
        while inner.order.len() > inner.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The flat address space as seen by one client: log unit access, an
/// optional read cache and the hole filling protocol.
pub struct AddressSpaceView {
    log_unit: Arc<dyn LogUnitService>,
    cache: Option<ReadCache>,
    retry: RetryPolicy,
    hole_fill_grace: Duration,
    hole_fill_poll: Duration,
}

impl AddressSpaceView {
    pub fn new(
        log_unit: Arc<dyn LogUnitService>,
        cache: Option<ReadCache>,
        retry: RetryPolicy,
        hole_fill_grace: Duration,
        hole_fill_poll: Duration,
    ) -> Self {
        Self {
            log_unit,
            cache,
            retry,
            hole_fill_grace,
            hole_fill_poll,
        }
    }

    pub fn log_unit(&self) -> &Arc<dyn LogUnitService> {
        &self.log_unit
    }

    pub fn cache(&self) -> Option<&ReadCache> {
        self.cache.as_ref()
    }

    pub async fn read(&self, address: GlobalAddress) -> LogUnitResult<ReadResult> {
        if let Some(record) = self.cache.as_ref().and_then(|c| c.get(address)) {
            return Ok(ReadResult::Decided(record));
        }
        let result = self.log_unit.read(address).await?;
        if let (Some(cache), ReadResult::Decided(record)) = (&self.cache, &result) {
            cache.insert(address, record.clone());
        }
        Ok(result)
    }

    pub async fn write(&self, address: GlobalAddress, record: LogRecord) -> LogUnitResult<()> {
        self.log_unit.write(address, record.clone()).await?;
        if let Some(cache) = &self.cache {
            cache.insert(address, record);
        }
        Ok(())
    }

    pub async fn fill_hole(&self, address: GlobalAddress) -> LogUnitResult<()> {
        self.log_unit.fill_hole(address).await?;
        if let Some(cache) = &self.cache {
            cache.insert(address, LogRecord::hole());
        }
        Ok(())
    }

    /// Reads `address` until it is decided. An address that stays undecided
    /// for longer than the grace period is filled with a hole.
    ///
    /// Recoverable failures are retried with the runtime's backoff. With
    /// `max_attempts` unset only `cancel` ends a read against an unreachable
    /// log unit; otherwise the read fails with `RetriesExhausted`.
    pub async fn read_decided(
        &self,
        address: GlobalAddress,
        cancel: Option<&CancellationToken>,
    ) -> StreamResult<LogRecord> {
        let mut backoff = self.retry.backoff();
        let started = Instant::now();

        loop {
            check_cancelled(cancel)?;
            let err = match self.read(address).await {
                Ok(ReadResult::Decided(record)) => return Ok(record),
                Ok(ReadResult::Empty) if started.elapsed() < self.hole_fill_grace => {
                    sleep_or_cancel(self.hole_fill_poll, cancel).await?;
                    continue;
                }
                Ok(ReadResult::Empty) => match self.fill_hole(address).await {
                    Ok(()) => {
                        warn!(
                            "Filled hole at {} after waiting {:?}",
                            address,
                            started.elapsed()
                        );
                        return Ok(LogRecord::hole());
                    }
                    Err(LogUnitError::AlreadyDecided(_)) => {
                        debug!("Address {} decided while filling, re-reading", address);
                        continue;
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if !log_failure(&err, &format!("read of address {}", address)) {
                return Err(err.into());
            }
            backoff.wait(cancel).await?;
        }
    }
}
