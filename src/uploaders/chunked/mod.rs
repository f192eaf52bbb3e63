mod http;
mod progress_stream;

pub use http::{HttpTransport, form};

use std::sync::Arc;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use crate::core::{
    ChunkPayload, ChunkProgress, ChunkTransport, ChunkedConfig, Result, TaskPatch,
    TransferError, TransportError, UploadId, UploadSource, UploadStatus, UploadStore,
};
use crate::utils::{SpeedEstimator, display_percent};

/// 分片 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub is_last: bool,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// 分片计划
///
/// `chunk_count = ceil(file_size / chunk_size)`；空文件也会发送一个空的最终分片，
/// 让远端完成合并。
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TransferError::invalid_config("chunk size must be greater than 0"));
        }
        Ok(Self { file_size, chunk_size })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_count(&self) -> usize {
        if self.file_size == 0 {
            return 1;
        }
        self.file_size.div_ceil(self.chunk_size) as usize
    }

    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        let count = self.chunk_count();
        if index >= count {
            return None;
        }

        let start = (index as u64 * self.chunk_size).min(self.file_size);
        let end = (start + self.chunk_size).min(self.file_size);
        Some(Chunk {
            index,
            start,
            end,
            is_last: index + 1 == count,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.chunk_count()).filter_map(|index| self.chunk(index))
    }
}

/// 分片循环的结束方式
#[derive(Debug)]
pub enum TransmitOutcome {
    /// 所有分片都已被确认
    Completed {
        uploaded: u64,
    },
    /// 发送下一个分片前发现任务已不在上传状态
    Cancelled {
        uploaded: u64,
        chunks_sent: usize,
    },
    /// 某个分片请求失败，后续分片不再发送
    Failed {
        error: TransportError,
        chunk: usize,
        uploaded: u64,
    },
}

/// 单个任务的进度状态，只在一次 `transmit` 内存在
struct ProgressState {
    file_size: u64,
    completed_bytes: u64,
    percent: u8,
    speed: SpeedEstimator,
}

impl ProgressState {
    fn new(file_size: u64, started_at: Instant) -> Self {
        Self {
            file_size,
            completed_bytes: 0,
            percent: 0,
            speed: SpeedEstimator::new(started_at.into_std()),
        }
    }

    /// 传输层的进度事件
    fn on_loaded(&mut self, chunk: &Chunk, loaded: u64) -> TaskPatch {
        let cumulative = self.completed_bytes + loaded.min(chunk.len());
        self.percent = self.percent.max(display_percent(cumulative, self.file_size));
        let speed = self.speed.sample(Instant::now().into_std(), cumulative);

        TaskPatch::new().progress(self.percent).speed(speed)
    }

    /// 分片请求已确认
    fn on_chunk_done(&mut self, chunk: &Chunk, credited: u64) -> TaskPatch {
        self.completed_bytes += credited;
        self.percent = if chunk.is_last {
            100
        } else {
            self.percent.max(display_percent(self.completed_bytes, self.file_size))
        };
        let speed = self.speed.resync(Instant::now().into_std(), self.completed_bytes);

        TaskPatch::new().progress(self.percent).speed(speed)
    }
}

/// 分片发送器
///
/// 严格按顺序一次发送一个分片，每个进度事件和每个分片完成后更新 store。
pub struct ChunkTransmitter {
    store: UploadStore,
    transport: Arc<dyn ChunkTransport>,
    config: ChunkedConfig,
}

impl ChunkTransmitter {
    pub fn new(store: UploadStore, transport: Arc<dyn ChunkTransport>, config: ChunkedConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    fn is_uploading(&self, id: UploadId) -> bool {
        self.store
            .get_task(id)
            .is_some_and(|task| task.status == UploadStatus::Uploading)
    }

    fn request_token(&self, id: UploadId) -> CancellationToken {
        if !self.config.abort_in_flight {
            return CancellationToken::new();
        }
        self.store.cancellation_token(id).unwrap_or_default()
    }

    pub async fn transmit(&self, id: UploadId, source: &dyn UploadSource, category: &str) -> TransmitOutcome {
        let plan = match ChunkPlan::new(source.len(), self.config.chunk_size) {
            Ok(plan) => plan,
            Err(err) => {
                return TransmitOutcome::Failed {
                    error: TransportError::new(err.to_string()),
                    chunk: 0,
                    uploaded: 0,
                };
            }
        };

        let start_time = Utc::now().timestamp_millis();
        let mut state = ProgressState::new(plan.file_size(), Instant::now());
        let cancel = self.request_token(id);
        let total = plan.chunk_count();

        for chunk in plan.iter() {
            // 唯一的取消检查点
            if !self.is_uploading(id) {
                debug!(upload_id = %id, chunk = chunk.index, total, "upload no longer active, stop before chunk");
                return TransmitOutcome::Cancelled {
                    uploaded: state.completed_bytes,
                    chunks_sent: chunk.index,
                };
            }

            let bytes = match source.read_range(chunk.start, chunk.end).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    return TransmitOutcome::Failed {
                        error: TransportError::from_source(&err),
                        chunk: chunk.index,
                        uploaded: state.completed_bytes,
                    };
                }
            };
            let credited = bytes.len() as u64;

            debug!(
                upload_id = %id,
                chunk = chunk.index + 1,
                total,
                start = chunk.start,
                end = chunk.end,
                "sending chunk"
            );

            let payload = ChunkPayload {
                index: chunk.index,
                bytes,
                file_name: source.name().to_string(),
                start_time,
                category: category.to_string(),
                is_last: chunk.is_last,
            };

            let (progress, mut progress_rx) = ChunkProgress::channel();
            let request = self.transport.send_chunk(payload, progress, cancel.clone());
            tokio::pin!(request);

            let result = loop {
                tokio::select! {
                    Some(loaded) = progress_rx.recv() => {
                        trace!(upload_id = %id, chunk = chunk.index, loaded, "chunk progress");
                        self.store.update_task(id, state.on_loaded(&chunk, loaded));
                    }
                    result = &mut request => break result,
                }
            };
            // 请求结束前最后几次上报
            while let Ok(loaded) = progress_rx.try_recv() {
                self.store.update_task(id, state.on_loaded(&chunk, loaded));
            }

            if let Err(error) = result {
                return TransmitOutcome::Failed {
                    error,
                    chunk: chunk.index,
                    uploaded: state.completed_bytes,
                };
            }

            self.store.update_task(id, state.on_chunk_done(&chunk, credited));
            debug!(upload_id = %id, chunk = chunk.index + 1, total, uploaded = state.completed_bytes, "chunk acknowledged");
        }

        TransmitOutcome::Completed {
            uploaded: state.completed_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_plan_covers_file_without_gaps() {
        for (file_size, chunk_size) in [(1, 1), (10, 3), (100, 10), (101, 10), (49 * MIB, 49 * MIB), (7, 100)] {
            let plan = ChunkPlan::new(file_size, chunk_size).unwrap();
            let chunks: Vec<_> = plan.iter().collect();

            assert_eq!(chunks.len() as u64, file_size.div_ceil(chunk_size));
            assert_eq!(chunks.first().unwrap().start, 0);
            assert_eq!(chunks.last().unwrap().end, file_size);
            assert!(chunks.windows(2).all(|w| w[0].end == w[1].start));
            assert_eq!(chunks.iter().map(Chunk::len).sum::<u64>(), file_size);
            assert_eq!(chunks.iter().filter(|c| c.is_last).count(), 1);
            assert!(chunks.last().unwrap().is_last);
        }
    }

    #[test]
    fn test_plan_for_100_mib() {
        let plan = ChunkPlan::new(100 * MIB, 49 * MIB).unwrap();
        let ranges: Vec<_> = plan.iter().map(|c| (c.start, c.end, c.is_last)).collect();

        assert_eq!(plan.chunk_count(), 3);
        assert_eq!(
            ranges,
            vec![
                (0, 49 * MIB, false),
                (49 * MIB, 98 * MIB, false),
                (98 * MIB, 100 * MIB, true),
            ]
        );
    }

    #[test]
    fn test_empty_file_has_single_final_chunk() {
        let plan = ChunkPlan::new(0, 10).unwrap();
        let chunks: Vec<_> = plan.iter().collect();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
        assert!(chunks[0].is_last);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(ChunkPlan::new(10, 0), Err(TransferError::InvalidConfig(_))));
        assert!(ChunkPlan::new(10, 5).unwrap().chunk(2).is_none());
    }

    #[test]
    fn test_progress_state_never_reports_100_early() {
        let plan = ChunkPlan::new(1000, 500).unwrap();
        let first = plan.chunk(0).unwrap();
        let last = plan.chunk(1).unwrap();
        let mut state = ProgressState::new(1000, Instant::now());

        state.on_loaded(&first, 500);
        state.on_chunk_done(&first, 500);
        let patch = state.on_loaded(&last, 500);
        assert_eq!(patch.progress, Some(99));

        // 传输层多报的字节按分片长度截断
        let patch = state.on_loaded(&last, 10_000);
        assert_eq!(patch.progress, Some(99));

        let patch = state.on_chunk_done(&last, 500);
        assert_eq!(patch.progress, Some(100));
    }

    #[test]
    fn test_progress_state_is_monotonic() {
        let plan = ChunkPlan::new(1000, 1000).unwrap();
        let chunk = plan.chunk(0).unwrap();
        let mut state = ProgressState::new(1000, Instant::now());

        assert_eq!(state.on_loaded(&chunk, 600).progress, Some(60));
        // 乱序的旧事件不会让进度回退
        assert_eq!(state.on_loaded(&chunk, 300).progress, Some(60));
    }
}
