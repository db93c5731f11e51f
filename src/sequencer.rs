//! Token issuing for the shared log.
//!
//! The sequencer owns only reservation bookkeeping: the global tail and the
//! last reserved address of every stream. It never sees payloads, so all of
//! its state can be rebuilt from the log unit after a crash.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SequencerOptions;
use crate::error::SequencerError;
use crate::traits::{LogUnitService, SequencerResult, SequencerService};
use crate::types::{GlobalAddress, StreamId, Token};

#[derive(Debug, Default)]
struct SequencerState {
    ready: bool,
    /// Next unreserved address
    global_tail: GlobalAddress,
    stream_tails: HashMap<StreamId, GlobalAddress>,
}

pub struct Sequencer {
    state: Mutex<SequencerState>,
}

impl Sequencer {
    pub fn new(options: SequencerOptions) -> Self {
        Self {
            state: Mutex::new(SequencerState {
                ready: !options.require_recovery,
                ..Default::default()
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Reserves `count` addresses. The whole update happens under one lock,
    /// which is the single serialization point for address assignment.
    pub fn issue(&self, streams: &[StreamId], count: u64) -> SequencerResult<Token> {
        if count == 0 {
            return Err(SequencerError::InvalidCount(count));
        }

        let mut state = self.state.lock();
        if !state.ready {
            return Err(SequencerError::NotReady);
        }

        let start = state.global_tail;
        let Some(end) = start.checked_add(count) else {
            warn!(
                "Token of {} addresses at {} exceeds the address space",
                count, start
            );
            return Err(SequencerError::InvalidCount(count));
        };
        let last = end - 1;

        let mut backpointers = BTreeMap::new();
        for stream in streams {
            if backpointers.contains_key(stream) {
                continue;
            }
            let prev = state.stream_tails.insert(*stream, last);
            backpointers.insert(*stream, prev);
        }
        state.global_tail = end;

        debug!(
            "Issued token [{}, {}) for {} streams",
            start,
            state.global_tail,
            backpointers.len()
        );

        Ok(Token {
            address: start,
            count,
            backpointers,
        })
    }

    pub fn tail(&self) -> SequencerResult<GlobalAddress> {
        let state = self.state.lock();
        if !state.ready {
            return Err(SequencerError::NotReady);
        }
        Ok(state.global_tail)
    }

    pub fn tail_of(&self, stream: &StreamId) -> SequencerResult<Option<GlobalAddress>> {
        let state = self.state.lock();
        if !state.ready {
            return Err(SequencerError::NotReady);
        }
        Ok(state.stream_tails.get(stream).copied())
    }

    /// Rebuilds the tails from what the log unit has decided and marks the
    /// sequencer ready. Every stream the log unit has indexed gets its tail
    /// back; `streams` are queried on top of that. Tails never move backwards.
    pub async fn recover(
        &self,
        log_unit: &dyn LogUnitService,
        streams: &[StreamId],
    ) -> SequencerResult<()> {
        let global_tail = log_unit
            .global_tail()
            .await
            .map_err(|e| SequencerError::Recovery(e.to_string()))?;

        let mut stream_tails = log_unit
            .stream_tails()
            .await
            .map_err(|e| SequencerError::Recovery(e.to_string()))?;
        for stream in streams {
            let tail = log_unit
                .stream_tail(stream)
                .await
                .map_err(|e| SequencerError::Recovery(e.to_string()))?;
            if let Some(tail) = tail {
                stream_tails.push((*stream, tail));
            }
        }

        let mut state = self.state.lock();
        state.global_tail = state.global_tail.max(global_tail);
        for (stream, tail) in stream_tails {
            let entry = state.stream_tails.entry(stream).or_insert(tail);
            *entry = (*entry).max(tail);
        }
        state.ready = true;

        info!(
            "Sequencer recovered: global tail {}, {} stream tails",
            state.global_tail,
            state.stream_tails.len()
        );
        Ok(())
    }

    /// Drops all state, as after a crash. Tokens are refused until `recover`.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = SequencerState::default();
        info!("Sequencer reset, waiting for recovery");
    }
}

#[async_trait]
impl SequencerService for Sequencer {
    async fn next_token(&self, streams: &[StreamId], count: u64) -> SequencerResult<Token> {
        self.issue(streams, count)
    }

    async fn global_tail(&self) -> SequencerResult<GlobalAddress> {
        self.tail()
    }

    async fn stream_tail(&self, stream: &StreamId) -> SequencerResult<Option<GlobalAddress>> {
        self.tail_of(stream)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::config::LogUnitOptions;
    use crate::logunit::LogUnit;
    use crate::types::LogRecord;

    fn stream(name: &str) -> StreamId {
        StreamId::from_name(name)
    }

    #[test]
    fn test_first_token_has_no_backpointer() {
        let seq = Sequencer::new(SequencerOptions::default());
        let a = stream("a");

        let token = seq.issue(&[a], 1).unwrap();
        assert_eq!(token.address, 0);
        assert_eq!(token.backpointers.get(&a), Some(&None));

        let token = seq.issue(&[a], 1).unwrap();
        assert_eq!(token.address, 1);
        assert_eq!(token.backpointers.get(&a), Some(&Some(0)));
    }

    #[test]
    fn test_multi_address_token() {
        let seq = Sequencer::new(SequencerOptions::default());
        let a = stream("a");

        let token = seq.issue(&[a], 3).unwrap();
        assert_eq!(token.addresses(), 0..3);
        assert_eq!(token.last_address(), 2);
        assert_eq!(seq.tail().unwrap(), 3);
        assert_eq!(seq.tail_of(&a).unwrap(), Some(2));

        let next = seq.issue(&[a], 1).unwrap();
        assert_eq!(next.address, 3);
        assert_eq!(next.backpointers.get(&a), Some(&Some(2)));
    }

    #[test]
    fn test_multi_stream_token() {
        let seq = Sequencer::new(SequencerOptions::default());
        let (a, b) = (stream("a"), stream("b"));

        seq.issue(&[a], 1).unwrap();
        let token = seq.issue(&[a, b, a], 1).unwrap();
        assert_eq!(token.address, 1);
        assert_eq!(token.backpointers.len(), 2);
        assert_eq!(token.backpointers.get(&a), Some(&Some(0)));
        assert_eq!(token.backpointers.get(&b), Some(&None));
    }

    #[test]
    fn test_empty_stream_set_reserves_addresses() {
        let seq = Sequencer::new(SequencerOptions::default());
        let token = seq.issue(&[], 2).unwrap();
        assert_eq!(token.addresses(), 0..2);
        assert!(token.backpointers.is_empty());
        assert_eq!(seq.tail().unwrap(), 2);
    }

    #[test]
    fn test_zero_count_rejected() {
        let seq = Sequencer::new(SequencerOptions::default());
        assert!(matches!(
            seq.issue(&[stream("a")], 0),
            Err(SequencerError::InvalidCount(0))
        ));
        assert_eq!(seq.tail().unwrap(), 0);
    }

    #[test]
    fn test_not_ready_until_recovered() {
        let seq = Sequencer::new(SequencerOptions {
            require_recovery: true,
        });
        assert!(!seq.is_ready());
        assert!(matches!(
            seq.issue(&[stream("a")], 1),
            Err(SequencerError::NotReady)
        ));
        assert!(matches!(seq.tail(), Err(SequencerError::NotReady)));
    }

    #[test]
    fn test_reset_refuses_tokens() {
        let seq = Sequencer::new(SequencerOptions::default());
        seq.issue(&[stream("a")], 1).unwrap();
        seq.reset();
        assert!(matches!(
            seq.issue(&[stream("a")], 1),
            Err(SequencerError::NotReady)
        ));
    }

    #[test]
    fn test_token_past_address_space_rejected() {
        let seq = Sequencer::new(SequencerOptions::default());
        let a = stream("a");
        seq.issue(&[a], 1).unwrap();

        assert!(matches!(
            seq.issue(&[a], u64::MAX),
            Err(SequencerError::InvalidCount(u64::MAX))
        ));
        assert_eq!(seq.tail().unwrap(), 1);
        assert_eq!(seq.tail_of(&a).unwrap(), Some(0));

        let next = seq.issue(&[a], 1).unwrap();
        assert_eq!(next.address, 1);
        assert_eq!(next.backpointers.get(&a), Some(&Some(0)));
    }

    #[tokio::test]
    async fn test_recover_restores_unlisted_streams() {
        let unit = LogUnit::new(LogUnitOptions::default());
        let (a, b) = (stream("a"), stream("b"));
        for (address, owner) in [(0, a), (1, b), (2, a)] {
            let record = LogRecord::data(b"x".to_vec(), BTreeMap::from([(owner, None)]));
            unit.write_record(address, record).unwrap();
        }

        let seq = Sequencer::new(SequencerOptions {
            require_recovery: true,
        });
        seq.recover(&unit, &[]).await.unwrap();

        assert_eq!(seq.tail().unwrap(), 3);
        assert_eq!(seq.tail_of(&a).unwrap(), Some(2));
        assert_eq!(seq.tail_of(&b).unwrap(), Some(1));

        let token = seq.issue(&[a], 1).unwrap();
        assert_eq!(token.address, 3);
        assert_eq!(token.backpointers.get(&a), Some(&Some(2)));
    }

    #[test]
    fn test_concurrent_tokens_are_disjoint() {
        let seq = Arc::new(Sequencer::new(SequencerOptions::default()));
        let a = stream("a");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let seq = seq.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .map(|_| seq.issue(&[a], 1 + (i % 3)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for token in handle.join().unwrap() {
                for addr in token.addresses() {
                    assert!(seen.insert(addr), "address {} issued twice", addr);
                }
                total += token.count;
            }
        }
        assert_eq!(seq.tail().unwrap(), total);
        assert_eq!(seen.len() as u64, total);
    }
}
