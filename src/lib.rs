//! A shared log: a sequencer hands out addresses, write-once log units store
//! them, and stream views give each client an ordered sub-log.

pub mod config;
pub mod error;
pub mod layout;
pub mod logunit;
pub mod retry;
pub mod runtime;
pub mod sequencer;
pub mod stream;
pub mod traits;
pub mod transport;
pub mod types;

pub use config::{LogUnitOptions, RetryOptions, RuntimeOptions, SequencerOptions};
pub use error::{
    CorfuError, ErrorHandler, ErrorSeverity, LogUnitError, SequencerError, StorageError,
    StreamError, TransportError,
};
pub use layout::{Layout, ReplicationScheme, StaticLayout};
pub use logunit::LogUnit;
pub use runtime::{AddressSpaceView, LocalLog, LogRuntime, ReadCache};
pub use sequencer::Sequencer;
pub use stream::StreamView;
pub use traits::{
    CorfuResult, LayoutService, LogUnitResult, LogUnitService, SequencerResult, SequencerService,
    StreamResult,
};
pub use transport::{LocalTransport, TransportOptions};
pub use types::{Backpointer, GlobalAddress, LogData, LogRecord, ReadResult, StreamId, Token};
