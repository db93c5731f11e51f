use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::types::GlobalAddress;

/// 顶层错误类型
#[derive(Debug, Clone, Error)]
pub enum CorfuError {
    #[error("Sequencer error: {0}")]
    Sequencer(#[from] SequencerError),

    #[error("Log unit error: {0}")]
    LogUnit(#[from] LogUnitError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Config error: {0}")]
    Config(String),
}

/// 序列器相关错误
#[derive(Debug, Clone, Error)]
pub enum SequencerError {
    #[error("Sequencer not ready, recovery has not completed")]
    NotReady,

    #[error("Invalid token count {0}")]
    InvalidCount(u64),

    #[error("Recovery failed: {0}")]
    Recovery(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// 日志单元相关错误
#[derive(Debug, Clone, Error)]
pub enum LogUnitError {
    /// The address was already decided; the writer's reservation is stale.
    #[error("Address {0} already written")]
    Overwrite(GlobalAddress),

    #[error("Address {0} already decided")]
    AlreadyDecided(GlobalAddress),

    #[error("Address {0} is outside the address space")]
    AddressOverflow(GlobalAddress),

    #[error("Log unit failed and refuses further operations")]
    Failed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// 存储相关错误
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("Corrupted data at offset {0}")]
    DataCorruption(u64),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(Arc::new(e))
    }
}

/// 传输层错误
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Endpoint {0} unavailable")]
    Unavailable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request dropped")]
    Dropped,
}

/// StreamView 对外错误
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Gave up after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Sequencer error: {0}")]
    Sequencer(#[from] SequencerError),

    #[error("Log unit error: {0}")]
    LogUnit(#[from] LogUnitError),
}

// === 统一错误处理机制 ===
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    Fatal,       // 需要终止当前实例
    Recoverable, // 可以退避重试
    Ignorable,   // 仅需记录日志
}

pub trait ErrorHandler {
    fn severity(&self) -> ErrorSeverity;
    fn context(&self) -> String;
}

impl ErrorHandler for TransportError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Recoverable
    }

    fn context(&self) -> String {
        match self {
            TransportError::Unavailable(endpoint) => format!("Endpoint {} unavailable", endpoint),
            TransportError::Timeout => "Request timeout".to_string(),
            TransportError::Dropped => "Request dropped".to_string(),
        }
    }
}

impl ErrorHandler for StorageError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            StorageError::Io(_) => ErrorSeverity::Fatal,
            StorageError::DataCorruption(_) => ErrorSeverity::Fatal,
            StorageError::Encode(_) => ErrorSeverity::Recoverable,
            StorageError::Decode(_) => ErrorSeverity::Fatal,
        }
    }

    fn context(&self) -> String {
        match self {
            StorageError::Io(e) => format!("IO error: {}", e),
            StorageError::DataCorruption(offset) => format!("Data corruption at offset {}", offset),
            StorageError::Encode(msg) => format!("Encode error: {}", msg),
            StorageError::Decode(msg) => format!("Decode error: {}", msg),
        }
    }
}

impl ErrorHandler for SequencerError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            SequencerError::NotReady => ErrorSeverity::Recoverable,
            SequencerError::InvalidCount(_) => ErrorSeverity::Fatal,
            SequencerError::Recovery(_) => ErrorSeverity::Recoverable,
            SequencerError::Transport(e) => e.severity(),
        }
    }

    fn context(&self) -> String {
        match self {
            SequencerError::NotReady => "Sequencer not ready".to_string(),
            SequencerError::InvalidCount(n) => format!("Invalid token count {}", n),
            SequencerError::Recovery(msg) => format!("Recovery failed: {}", msg),
            SequencerError::Transport(e) => e.context(),
        }
    }
}

impl ErrorHandler for LogUnitError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            // stale reservation, the writer retries with a fresh token
            LogUnitError::Overwrite(_) => ErrorSeverity::Recoverable,
            LogUnitError::AlreadyDecided(_) => ErrorSeverity::Ignorable,
            LogUnitError::AddressOverflow(_) => ErrorSeverity::Fatal,
            LogUnitError::Failed => ErrorSeverity::Fatal,
            LogUnitError::Storage(e) => e.severity(),
            LogUnitError::Transport(e) => e.severity(),
        }
    }

    fn context(&self) -> String {
        match self {
            LogUnitError::Overwrite(addr) => format!("Address {} already written", addr),
            LogUnitError::AlreadyDecided(addr) => format!("Address {} already decided", addr),
            LogUnitError::AddressOverflow(addr) => format!("Address {} out of range", addr),
            LogUnitError::Failed => "Log unit failed".to_string(),
            LogUnitError::Storage(e) => e.context(),
            LogUnitError::Transport(e) => e.context(),
        }
    }
}

impl ErrorHandler for StreamError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            StreamError::Cancelled => ErrorSeverity::Ignorable,
            StreamError::RetriesExhausted(_) => ErrorSeverity::Recoverable,
            StreamError::Sequencer(e) => e.severity(),
            StreamError::LogUnit(e) => e.severity(),
        }
    }

    fn context(&self) -> String {
        match self {
            StreamError::Cancelled => "Operation cancelled".to_string(),
            StreamError::RetriesExhausted(n) => format!("Gave up after {} attempts", n),
            StreamError::Sequencer(e) => e.context(),
            StreamError::LogUnit(e) => e.context(),
        }
    }
}

/// Logs a failed operation according to its severity and reports whether the
/// caller may retry it.
pub fn log_failure<E: ErrorHandler>(e: &E, operation: &str) -> bool {
    match e.severity() {
        ErrorSeverity::Fatal => {
            error!("[FATAL] {} failed: {}", operation, e.context());
            false
        }
        ErrorSeverity::Recoverable => {
            warn!("[RECOVERABLE] {} failed: {} - Will retry", operation, e.context());
            true
        }
        ErrorSeverity::Ignorable => {
            info!("[IGNORABLE] {} failed: {}", operation, e.context());
            true
        }
    }
}
