use async_trait::async_trait;

use crate::error::{CorfuError, LogUnitError, SequencerError, StreamError};
use crate::layout::Layout;
use crate::types::{GlobalAddress, LogRecord, ReadResult, StreamId, Token};

// 结果类型别名
pub type CorfuResult<T> = Result<T, CorfuError>;
pub type SequencerResult<T> = Result<T, SequencerError>;
pub type LogUnitResult<T> = Result<T, LogUnitError>;
pub type StreamResult<T> = Result<T, StreamError>;

/// Issues globally unique, totally ordered address reservations.
///
/// Implementations must be linearizable: no two tokens ever overlap, and
/// `next_token` never waits on I/O.
#[async_trait]
pub trait SequencerService: Send + Sync {
    /// Reserves `count` contiguous addresses for `streams`.
    async fn next_token(&self, streams: &[StreamId], count: u64) -> SequencerResult<Token>;

    /// Next unreserved address. Reserves nothing.
    async fn global_tail(&self) -> SequencerResult<GlobalAddress>;

    /// Last address reserved for `stream`. Reserves nothing.
    async fn stream_tail(&self, stream: &StreamId) -> SequencerResult<Option<GlobalAddress>>;
}

/// Owner of the write-once address space.
///
/// `write` and `fill_hole` share one rule: the first decision at an address
/// wins, data or hole.
#[async_trait]
pub trait LogUnitService: Send + Sync {
    async fn write(&self, address: GlobalAddress, record: LogRecord) -> LogUnitResult<()>;

    async fn read(&self, address: GlobalAddress) -> LogUnitResult<ReadResult>;

    /// Decides `address` as a hole. Fails with `AlreadyDecided` if it was
    /// decided before.
    async fn fill_hole(&self, address: GlobalAddress) -> LogUnitResult<()>;

    /// One past the highest decided address.
    async fn global_tail(&self) -> LogUnitResult<GlobalAddress>;

    /// Address of the most recently decided record of `stream`.
    async fn stream_tail(&self, stream: &StreamId) -> LogUnitResult<Option<GlobalAddress>>;

    /// Most recently decided address of every stream with at least one
    /// data record.
    async fn stream_tails(&self) -> LogUnitResult<Vec<(StreamId, GlobalAddress)>>;

    /// Highest address `C` such that every address `<= C` is decided.
    async fn contiguous_tail(&self) -> LogUnitResult<Option<GlobalAddress>>;
}

/// Source of the current cluster layout, maintained by the consensus layer.
#[async_trait]
pub trait LayoutService: Send + Sync {
    async fn current_layout(&self) -> CorfuResult<Layout>;
}
