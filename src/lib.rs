pub mod core;
pub mod uploaders;
pub mod utils;
pub mod config;

// 重新导出核心类型
pub use core::{
    ChunkTransport,
    ChunkedConfig,
    ErrorKind,
    TaskPatch,
    TransferError,
    TransportError,
    UploadEvent,
    UploadId,
    UploadManager,
    UploadManagerBuilder,
    UploadOutcome,
    UploadSource,
    UploadStatus,
    UploadStore,
    UploadTask,
    Result,
};

// 重新导出上传器
pub use uploaders::{
    ChunkPlan,
    FileSource,
    HttpTransport,
    MemorySource,
};
