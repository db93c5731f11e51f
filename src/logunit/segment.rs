use std::{
    fs::{File, OpenOptions},
    io::Write,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::error::StorageError;
use crate::types::{GlobalAddress, LogRecord};

use super::entry::{DecisionRecord, ENTRY_HEADER_SIZE, EntryHeader};

// Record segment file format:
// | EntryHeader(size, kind, magic, crc) | bincode(DecisionRecord) | ... |
//
// Decisions are only ever appended. A torn record at the end of the file
// (crash during append) is cut off on replay; anything unreadable before
// the last record is corruption.

pub struct RecordSegment {
    file_name: PathBuf,
    file: File,
    len: u64,
}

impl RecordSegment {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file_name: path.to_path_buf(),
            file,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn append(
        &mut self,
        address: GlobalAddress,
        record: &LogRecord,
        sync: bool,
    ) -> Result<(), StorageError> {
        let entry = DecisionRecord {
            address,
            record: record.clone(),
        }
        .encode_entry()?;

        self.file.write_all(&entry).map_err(|e| {
            warn!("Failed to append decision at {} to segment: {}", address, e);
            e
        })?;
        self.len += entry.len() as u64;

        if sync {
            self.file.sync_data().map_err(|e| {
                warn!("Failed to sync segment data: {}", e);
                e
            })?;
        }
        Ok(())
    }

    /// Reads every decision back in append order.
    pub fn replay(&mut self) -> Result<Vec<DecisionRecord>, StorageError> {
        let file_size = self.file.metadata()?.len();
        let mut decisions = Vec::new();
        let mut offset: u64 = 0;
        let mut header_buf = [0u8; ENTRY_HEADER_SIZE as usize];

        while offset < file_size {
            let remaining = file_size - offset;
            if remaining < ENTRY_HEADER_SIZE as u64 {
                self.truncate_torn(offset, file_size)?;
                break;
            }

            self.file.read_exact_at(&mut header_buf, offset)?;
            let header =
                EntryHeader::deserialize(&header_buf).ok_or(StorageError::DataCorruption(offset))?;

            if header.size as u64 > remaining {
                self.truncate_torn(offset, file_size)?;
                break;
            }

            let mut body = vec![0u8; header.body_len()];
            self.file
                .read_exact_at(&mut body, offset + ENTRY_HEADER_SIZE as u64)?;

            let is_last = offset + header.size as u64 == file_size;
            if crc32fast::hash(&body) != header.crc {
                if is_last {
                    self.truncate_torn(offset, file_size)?;
                    break;
                }
                return Err(StorageError::DataCorruption(offset));
            }

            let decision = DecisionRecord::deserialize(&body)?;
            if decision.kind() != header.kind {
                return Err(StorageError::DataCorruption(offset));
            }
            decisions.push(decision);
            offset += header.size as u64;
        }

        info!(
            "Replayed {} decisions from {:?}",
            decisions.len(),
            self.file_name
        );
        Ok(decisions)
    }

    fn truncate_torn(&mut self, offset: u64, file_size: u64) -> Result<(), StorageError> {
        warn!(
            "Truncating torn record at offset {} ({} bytes) in {:?}",
            offset,
            file_size - offset,
            self.file_name
        );
        self.file.set_len(offset)?;
        self.file.sync_data()?;
        self.len = offset;
        Ok(())
    }
}
