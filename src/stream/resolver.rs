//! Strategies for finding the next address of a stream.
//!
//! Both resolvers return the same records in the same order. Following
//! backpointers only saves reads of addresses that belong to other streams.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::log_failure;
use crate::retry::RetryPolicy;
use crate::runtime::AddressSpaceView;
use crate::traits::{SequencerService, StreamResult};
use crate::types::{GlobalAddress, LogRecord, StreamId};

/// Per view read position.
#[derive(Debug, Default)]
pub struct ReadState {
    /// Next address this view has not examined. Never moves backwards.
    pub cursor: GlobalAddress,
    /// Records of this stream already located above the cursor, ascending.
    pub pending: VecDeque<(GlobalAddress, LogRecord)>,
}

impl ReadState {
    pub fn seek(&mut self, address: GlobalAddress) {
        if address <= self.cursor {
            return;
        }
        self.cursor = address;
        while self
            .pending
            .front()
            .is_some_and(|(addr, _)| *addr < address)
        {
            self.pending.pop_front();
        }
    }

    fn take_pending(&mut self) -> Option<(GlobalAddress, LogRecord)> {
        while let Some((address, record)) = self.pending.pop_front() {
            if address >= self.cursor {
                self.cursor = address + 1;
                return Some((address, record));
            }
        }
        None
    }
}

/// Everything a resolver needs for one read.
pub struct ReadContext<'a> {
    pub stream: StreamId,
    pub sequencer: &'a dyn SequencerService,
    pub space: &'a AddressSpaceView,
    pub retry: &'a RetryPolicy,
    pub cancel: Option<&'a CancellationToken>,
}

impl ReadContext<'_> {
    pub async fn global_tail(&self) -> StreamResult<GlobalAddress> {
        let mut backoff = self.retry.backoff();
        loop {
            match self.sequencer.global_tail().await {
                Ok(tail) => return Ok(tail),
                Err(e) => {
                    if !log_failure(&e, "global tail query") {
                        return Err(e.into());
                    }
                    backoff.wait(self.cancel).await?;
                }
            }
        }
    }

    pub async fn stream_tail(&self) -> StreamResult<Option<GlobalAddress>> {
        let mut backoff = self.retry.backoff();
        loop {
            match self.sequencer.stream_tail(&self.stream).await {
                Ok(tail) => return Ok(tail),
                Err(e) => {
                    if !log_failure(&e, "stream tail query") {
                        return Err(e.into());
                    }
                    backoff.wait(self.cancel).await?;
                }
            }
        }
    }

    pub async fn read_decided(&self, address: GlobalAddress) -> StreamResult<LogRecord> {
        self.space.read_decided(address, self.cancel).await
    }
}

#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Finds the next record of the stream at or above `state.cursor` and
    /// moves the cursor past it. Returns `None` once the current tail is
    /// reached; the cursor then stays at or below the tail.
    async fn advance(
        &self,
        ctx: &ReadContext<'_>,
        state: &mut ReadState,
    ) -> StreamResult<Option<(GlobalAddress, LogRecord)>>;
}

/// Reads every address from the cursor up to the global tail.
pub struct ScanResolver;

#[async_trait]
impl AddressResolver for ScanResolver {
    async fn advance(
        &self,
        ctx: &ReadContext<'_>,
        state: &mut ReadState,
    ) -> StreamResult<Option<(GlobalAddress, LogRecord)>> {
        state.pending.clear();
        let tail = ctx.global_tail().await?;

        while state.cursor < tail {
            let address = state.cursor;
            let record = ctx.read_decided(address).await?;
            state.cursor = address + 1;
            if !record.is_hole() && record.belongs_to(&ctx.stream) {
                return Ok(Some((address, record)));
            }
        }
        Ok(None)
    }
}

/// Walks the backpointer chain from the stream's tail down to the cursor.
/// A hole, a foreign record or a stream the sequencer does not know breaks
/// the chain and the read falls back to scanning.
pub struct BackpointerResolver;

impl BackpointerResolver {
    /// Returns the chain in ascending order, or `None` if it is broken.
    async fn walk(
        ctx: &ReadContext<'_>,
        tail: GlobalAddress,
        cursor: GlobalAddress,
    ) -> StreamResult<Option<Vec<(GlobalAddress, LogRecord)>>> {
        let mut chain = Vec::new();
        let mut next = Some(tail);

        while let Some(address) = next {
            if address < cursor {
                break;
            }
            let record = ctx.read_decided(address).await?;
            if record.is_hole() || !record.belongs_to(&ctx.stream) {
                debug!(
                    "Backpointer chain of {} broken at {}, falling back to scan",
                    ctx.stream, address
                );
                return Ok(None);
            }

            next = record.backpointer(&ctx.stream).flatten();
            if next.is_some_and(|prev| prev >= address) {
                debug!("Backpointer at {} does not point backwards", address);
                return Ok(None);
            }
            chain.push((address, record));
        }

        chain.reverse();
        Ok(Some(chain))
    }
}

#[async_trait]
impl AddressResolver for BackpointerResolver {
    async fn advance(
        &self,
        ctx: &ReadContext<'_>,
        state: &mut ReadState,
    ) -> StreamResult<Option<(GlobalAddress, LogRecord)>> {
        if let Some(found) = state.take_pending() {
            return Ok(Some(found));
        }

        let Some(tail) = ctx.stream_tail().await? else {
            return ScanResolver.advance(ctx, state).await;
        };
        if tail < state.cursor {
            return Ok(None);
        }

        match Self::walk(ctx, tail, state.cursor).await? {
            Some(chain) => {
                state.pending = chain.into();
                Ok(state.take_pending())
            }
            None => ScanResolver.advance(ctx, state).await,
        }
    }
}
