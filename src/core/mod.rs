mod manager;
mod types;
mod traits;
mod errors;
mod store;
#[cfg(any(debug_assertions, feature = "diagnostics"))]
mod diagnostics;

pub use manager::{UploadManager, UploadManagerBuilder};
pub use store::UploadStore;
pub use types::{
    ChunkedConfig,
    TaskPatch,
    UploadEvent,
    UploadId,
    UploadOutcome,
    UploadStatus,
    UploadTask,
    DEFAULT_CHUNK_SIZE,
    DEFAULT_CLEANUP_DELAY,
    DEFAULT_COMPLETION_TOLERANCE,
};
pub use traits::{
    ChunkPayload,
    ChunkProgress,
    ChunkTransport,
    UploadSource,
};
pub use errors::{ErrorKind, Result, TransferError, TransportError};
#[cfg(any(debug_assertions, feature = "diagnostics"))]
pub use diagnostics::UploadDiagnostics;
