pub mod chunked;
pub mod source;

pub use chunked::{Chunk, ChunkPlan, ChunkTransmitter, HttpTransport, TransmitOutcome};
pub use source::{FileSource, MemorySource};
