//! In-process request/response delivery between clients and the log
//! services.
//!
//! The real wire transport lives outside this crate. `LocalTransport`
//! delivers each request by calling the service directly, optionally after a
//! delay, and can fail requests before they reach the service so retry paths
//! can be exercised. A failed request never had any effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::TransportError;
use crate::traits::{LogUnitResult, LogUnitService, SequencerResult, SequencerService};
use crate::types::{GlobalAddress, LogRecord, ReadResult, StreamId, Token};

/// 模拟传输行为的配置
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Delay added to every request
    pub latency: Duration,
    /// Probability of failing a request before delivery (0.0 - 1.0)
    pub failure_rate: f64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

pub struct LocalTransport {
    endpoint: String,
    sequencer: Arc<dyn SequencerService>,
    log_unit: Arc<dyn LogUnitService>,
    options: TransportOptions,
    fail_next: AtomicU32,
    injected_failures: AtomicU64,
    delivered: AtomicU64,
}

impl LocalTransport {
    pub fn new(
        endpoint: &str,
        sequencer: Arc<dyn SequencerService>,
        log_unit: Arc<dyn LogUnitService>,
        options: TransportOptions,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            sequencer,
            log_unit,
            options,
            fail_next: AtomicU32::new(0),
            injected_failures: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Fails the next `n` requests regardless of `failure_rate`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn injected_failures(&self) -> u64 {
        self.injected_failures.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn take_scripted_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn deliver(&self, op: &str) -> Result<(), TransportError> {
        if !self.options.latency.is_zero() {
            tokio::time::sleep(self.options.latency).await;
        }

        let random_failure =
            self.options.failure_rate > 0.0 && rand::random::<f64>() < self.options.failure_rate;
        if self.take_scripted_failure() || random_failure {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            trace!("Dropping {} request to {}", op, self.endpoint);
            return Err(TransportError::Unavailable(self.endpoint.clone()));
        }

        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl SequencerService for LocalTransport {
    async fn next_token(&self, streams: &[StreamId], count: u64) -> SequencerResult<Token> {
        self.deliver("next_token").await?;
        self.sequencer.next_token(streams, count).await
    }

    async fn global_tail(&self) -> SequencerResult<GlobalAddress> {
        self.deliver("global_tail").await?;
        self.sequencer.global_tail().await
    }

    async fn stream_tail(&self, stream: &StreamId) -> SequencerResult<Option<GlobalAddress>> {
        self.deliver("stream_tail").await?;
        self.sequencer.stream_tail(stream).await
    }
}

#[async_trait]
impl LogUnitService for LocalTransport {
    async fn write(&self, address: GlobalAddress, record: LogRecord) -> LogUnitResult<()> {
        self.deliver("write").await?;
        self.log_unit.write(address, record).await
    }

    async fn read(&self, address: GlobalAddress) -> LogUnitResult<ReadResult> {
        self.deliver("read").await?;
        self.log_unit.read(address).await
    }

    async fn fill_hole(&self, address: GlobalAddress) -> LogUnitResult<()> {
        self.deliver("fill_hole").await?;
        self.log_unit.fill_hole(address).await
    }

    async fn global_tail(&self) -> LogUnitResult<GlobalAddress> {
        self.deliver("global_tail").await?;
        self.log_unit.global_tail().await
    }

    async fn stream_tail(&self, stream: &StreamId) -> LogUnitResult<Option<GlobalAddress>> {
        self.deliver("stream_tail").await?;
        self.log_unit.stream_tail(stream).await
    }

    async fn stream_tails(&self) -> LogUnitResult<Vec<(StreamId, GlobalAddress)>> {
        self.deliver("stream_tails").await?;
        self.log_unit.stream_tails().await
    }

    async fn contiguous_tail(&self) -> LogUnitResult<Option<GlobalAddress>> {
        self.deliver("contiguous_tail").await?;
        self.log_unit.contiguous_tail().await
    }
}
