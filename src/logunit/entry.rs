use bincode::{Decode, Encode};

use crate::error::StorageError;
use crate::types::{GlobalAddress, LogRecord};

pub const ENTRY_MAGIC_NUM: u32 = 0x_C0DF_10C5;
pub const ENTRY_HEADER_SIZE: u32 = 16; // 4 + 4 + 4 + 4 = 16 bytes

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Data,
    Hole,
}

impl EntryKind {
    fn code(self) -> u32 {
        match self {
            EntryKind::Data => 1,
            EntryKind::Hole => 2,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(EntryKind::Data),
            2 => Some(EntryKind::Hole),
            _ => None,
        }
    }
}

/// Fixed size header in front of every persisted decision.
///
/// `size` covers header and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub size: u32,
    pub kind: EntryKind,
    pub magic_num: u32,
    pub crc: u32,
}

impl EntryHeader {
    pub fn new(size: u32, kind: EntryKind, crc: u32) -> Self {
        Self {
            size,
            kind,
            magic_num: ENTRY_MAGIC_NUM,
            crc,
        }
    }

    pub fn serialize(&self) -> [u8; ENTRY_HEADER_SIZE as usize] {
        let mut buf = [0u8; ENTRY_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.kind.code().to_le_bytes());
        buf[8..12].copy_from_slice(&self.magic_num.to_le_bytes());
        buf[12..16].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Returns `None` when the bytes cannot be a header written by us.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < ENTRY_HEADER_SIZE as usize {
            return None;
        }
        let word = |i: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[i..i + 4]);
            u32::from_le_bytes(bytes)
        };

        let magic_num = word(8);
        if magic_num != ENTRY_MAGIC_NUM {
            return None;
        }
        let size = word(0);
        if size < ENTRY_HEADER_SIZE {
            return None;
        }
        Some(Self {
            size,
            kind: EntryKind::from_code(word(4))?,
            magic_num,
            crc: word(12),
        })
    }

    pub fn body_len(&self) -> usize {
        (self.size - ENTRY_HEADER_SIZE) as usize
    }
}

/// A decision as persisted: the address and what was decided there.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct DecisionRecord {
    pub address: GlobalAddress,
    pub record: LogRecord,
}

impl DecisionRecord {
    pub fn kind(&self) -> EntryKind {
        if self.record.is_hole() {
            EntryKind::Hole
        } else {
            EntryKind::Data
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, StorageError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StorageError::Encode(e.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, StorageError> {
        let (record, _) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        Ok(record)
    }

    /// Header followed by body, ready to append.
    pub fn encode_entry(&self) -> Result<Vec<u8>, StorageError> {
        let body = self.serialize()?;
        let header = EntryHeader::new(
            body.len() as u32 + ENTRY_HEADER_SIZE,
            self.kind(),
            crc32fast::hash(&body),
        );

        let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE as usize + body.len());
        buf.extend_from_slice(&header.serialize());
        buf.extend_from_slice(&body);
        Ok(buf)
    }
}
