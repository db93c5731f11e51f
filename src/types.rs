use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::ops::Range;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 全局日志地址
pub type GlobalAddress = u64;

/// Previous address of a stream, `None` for the first record of the stream.
pub type Backpointer = Option<GlobalAddress>;

/// Logical partition of the shared address space.
///
/// Ids are derived from human readable names so that independent clients
/// agree on the id of a stream without coordination.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct StreamId(u128);

impl StreamId {
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).as_u128())
    }

    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_u128(self.0)
    }
}

impl From<Uuid> for StreamId {
    fn from(value: Uuid) -> Self {
        Self(value.as_u128())
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_uuid())
    }
}

/// Body of a decided address. Decided once, never re-interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum LogData {
    Data(Vec<u8>),
    Hole,
}

/// Immutable content of one global address.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LogRecord {
    pub data: LogData,
    /// Streams this record belongs to, each with its backpointer.
    pub backpointers: BTreeMap<StreamId, Backpointer>,
}

impl LogRecord {
    pub fn data(payload: Vec<u8>, backpointers: BTreeMap<StreamId, Backpointer>) -> Self {
        Self {
            data: LogData::Data(payload),
            backpointers,
        }
    }

    pub fn hole() -> Self {
        Self {
            data: LogData::Hole,
            backpointers: BTreeMap::new(),
        }
    }

    pub fn is_hole(&self) -> bool {
        matches!(self.data, LogData::Hole)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match &self.data {
            LogData::Data(bytes) => Some(bytes),
            LogData::Hole => None,
        }
    }

    pub fn belongs_to(&self, stream: &StreamId) -> bool {
        self.backpointers.contains_key(stream)
    }

    pub fn backpointer(&self, stream: &StreamId) -> Option<Backpointer> {
        self.backpointers.get(stream).copied()
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamId> {
        self.backpointers.keys()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
    }

    pub fn deserialize(data: &[u8]) -> Result<(Self, usize), bincode::error::DecodeError> {
        bincode::decode_from_slice(data, bincode::config::standard())
    }
}

/// Result of reading a single address from a log unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Not decided yet. Never permanent.
    Empty,
    Decided(LogRecord),
}

impl ReadResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, ReadResult::Empty)
    }

    pub fn into_record(self) -> Option<LogRecord> {
        match self {
            ReadResult::Empty => None,
            ReadResult::Decided(record) => Some(record),
        }
    }
}

/// Reservation of `count` contiguous addresses starting at `address`.
///
/// A token commits nothing; the holder may crash before writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub address: GlobalAddress,
    pub count: u64,
    /// Tail of every requested stream before this reservation.
    pub backpointers: BTreeMap<StreamId, Backpointer>,
}

impl Token {
    pub fn addresses(&self) -> Range<GlobalAddress> {
        self.address..self.address.saturating_add(self.count)
    }

    pub fn last_address(&self) -> GlobalAddress {
        self.address.saturating_add(self.count).saturating_sub(1)
    }
}
