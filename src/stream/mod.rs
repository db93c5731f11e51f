//! Per stream append and ordered replay over the shared address space.

mod resolver;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LogUnitError, log_failure};
use crate::retry::{RetryPolicy, check_cancelled};
use crate::runtime::AddressSpaceView;
use crate::traits::{SequencerService, StreamResult};
use crate::types::{GlobalAddress, LogRecord, ReadResult, StreamId};

pub use resolver::{AddressResolver, BackpointerResolver, ReadContext, ReadState, ScanResolver};

/// Client cursor over one stream.
///
/// Appends go through the sequencer and the log unit and retry with a fresh
/// token whenever the reserved address turns out to be decided already.
/// Reads return the stream's records in address order, one at a time.
/// A view can be shared between tasks; reads are serialized on its cursor.
pub struct StreamView {
    id: StreamId,
    epoch: u64,
    sequencer: Arc<dyn SequencerService>,
    space: Arc<AddressSpaceView>,
    retry: RetryPolicy,
    resolver: Arc<dyn AddressResolver>,
    state: Mutex<ReadState>,
}

impl StreamView {
    pub fn new(
        id: StreamId,
        epoch: u64,
        sequencer: Arc<dyn SequencerService>,
        space: Arc<AddressSpaceView>,
        retry: RetryPolicy,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            id,
            epoch,
            sequencer,
            space,
            retry,
            resolver,
            state: Mutex::new(ReadState::default()),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Layout epoch this view was created under.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub async fn cursor(&self) -> GlobalAddress {
        self.state.lock().await.cursor
    }

    /// Moves the cursor forward to `address`. Never rewinds.
    pub async fn seek(&self, address: GlobalAddress) {
        self.state.lock().await.seek(address);
    }

    /// Appends `payload` to this stream and returns the address it landed at.
    pub async fn write(&self, payload: impl Into<Vec<u8>>) -> StreamResult<GlobalAddress> {
        self.append(payload.into(), &[], None).await
    }

    /// Appends one record that belongs to this stream and every stream in
    /// `others`, at a single address.
    pub async fn write_multi(
        &self,
        payload: impl Into<Vec<u8>>,
        others: &[StreamId],
    ) -> StreamResult<GlobalAddress> {
        self.append(payload.into(), others, None).await
    }

    /// Like `write`, but gives up between attempts once `cancel` fires. A
    /// cancelled append may still have committed if cancellation raced the
    /// successful write.
    pub async fn write_with_cancel(
        &self,
        payload: impl Into<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> StreamResult<GlobalAddress> {
        self.append(payload.into(), &[], Some(cancel)).await
    }

    async fn append(
        &self,
        payload: Vec<u8>,
        others: &[StreamId],
        cancel: Option<&CancellationToken>,
    ) -> StreamResult<GlobalAddress> {
        let mut streams = Vec::with_capacity(others.len() + 1);
        streams.push(self.id);
        streams.extend_from_slice(others);

        let mut backoff = self.retry.backoff();
        loop {
            check_cancelled(cancel)?;

            let token = match self.sequencer.next_token(&streams, 1).await {
                Ok(token) => token,
                Err(e) => {
                    if !log_failure(&e, "token request") {
                        return Err(e.into());
                    }
                    backoff.wait(cancel).await?;
                    continue;
                }
            };

            let record = LogRecord::data(payload.clone(), token.backpointers);
            match self.commit(token.address, record, cancel).await {
                Ok(true) => {
                    debug!("Appended to {} at {}", self.id, token.address);
                    return Ok(token.address);
                }
                Ok(false) => {
                    warn!(
                        "Address {} for {} already decided, retrying with a fresh token (attempt {})",
                        token.address,
                        self.id,
                        backoff.attempts() + 1
                    );
                    backoff.wait(cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes `record` at `address`. Returns `false` when the reservation is
    /// stale. Transport failures are retried at the same address; an
    /// overwrite after such a failure is checked against what is stored, since
    /// the failed attempt may have been delivered.
    async fn commit(
        &self,
        address: GlobalAddress,
        record: LogRecord,
        cancel: Option<&CancellationToken>,
    ) -> StreamResult<bool> {
        let mut backoff = self.retry.backoff();
        let mut maybe_delivered = false;

        loop {
            match self.space.write(address, record.clone()).await {
                Ok(()) => return Ok(true),
                Err(LogUnitError::Overwrite(_)) if maybe_delivered => {
                    return Ok(self.is_ours(address, &record, cancel).await?);
                }
                Err(LogUnitError::Overwrite(_)) => return Ok(false),
                Err(e @ LogUnitError::Transport(_)) => {
                    log_failure(&e, &format!("write of address {}", address));
                    maybe_delivered = true;
                    backoff.wait(cancel).await?;
                }
                Err(e) => {
                    log_failure(&e, &format!("write of address {}", address));
                    return Err(e.into());
                }
            }
        }
    }

    async fn is_ours(
        &self,
        address: GlobalAddress,
        record: &LogRecord,
        cancel: Option<&CancellationToken>,
    ) -> StreamResult<bool> {
        let mut backoff = self.retry.backoff();
        loop {
            match self.space.read(address).await {
                Ok(ReadResult::Decided(stored)) => return Ok(&stored == record),
                Ok(ReadResult::Empty) => return Ok(false),
                Err(e) => {
                    if !log_failure(&e, &format!("read back of address {}", address)) {
                        return Err(e.into());
                    }
                    backoff.wait(cancel).await?;
                }
            }
        }
    }

    /// Returns the next record of this stream, or `None` when no record
    /// exists between the cursor and the current tail. `None` is not the end
    /// of the stream; a later read sees later appends.
    pub async fn read(&self) -> StreamResult<Option<LogRecord>> {
        self.read_inner(None).await
    }

    pub async fn read_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> StreamResult<Option<LogRecord>> {
        self.read_inner(Some(cancel)).await
    }

    async fn read_inner(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> StreamResult<Option<LogRecord>> {
        let mut state = self.state.lock().await;
        let ctx = ReadContext {
            stream: self.id,
            sequencer: self.sequencer.as_ref(),
            space: self.space.as_ref(),
            retry: &self.retry,
            cancel,
        };

        let found = self.resolver.advance(&ctx, &mut state).await?;
        Ok(found.map(|(address, record)| {
            debug!("Read {} at {}", self.id, address);
            record
        }))
    }

    /// Reads every record currently visible after the cursor.
    pub async fn read_all(&self) -> StreamResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read().await? {
            records.push(record);
        }
        info!("Read {} records from {}", records.len(), self.id);
        Ok(records)
    }
}
