use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use crate::uploaders::{ChunkPlan, ChunkTransmitter, TransmitOutcome};
use crate::utils::ZERO_SPEED;
use super::errors::{ErrorKind, Result, TransferError, TransportError};
use super::store::UploadStore;
use super::traits::{ChunkTransport, UploadSource};
use super::types::{ChunkedConfig, TaskPatch, UploadEvent, UploadId, UploadOutcome, UploadStatus};

/// 上传管理器
///
/// 负责单个文件的完整生命周期：写入初始状态、驱动分片循环、处理
/// 成功/失败/取消，成功后延迟从 store 中移除。多个文件可以同时上传，
/// 每个文件一个独立的异步流程。
#[derive(Clone)]
pub struct UploadManager {
    store: UploadStore,
    transport: Arc<dyn ChunkTransport>,
    config: ChunkedConfig,
}

impl UploadManager {
    pub fn new(transport: Arc<dyn ChunkTransport>, config: ChunkedConfig) -> Result<Self> {
        Self::builder().transport(transport).config(config).build()
    }

    pub fn builder() -> UploadManagerBuilder {
        UploadManagerBuilder::default()
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    pub fn config(&self) -> &ChunkedConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.store.subscribe_events()
    }

    /// 取消任务，等价于 `store().cancel_task(id)`
    pub fn cancel(&self, id: UploadId) {
        self.store.cancel_task(id);
    }

    /// 创建任务并上传
    pub async fn upload(&self, source: &dyn UploadSource, category: &str) -> UploadOutcome {
        let id = self.store.add_task(source.name(), source.len());
        self.run(id, source, category).await
    }

    /// 在后台上传，立即返回任务 ID
    pub fn spawn<S>(&self, source: S, category: impl Into<String>) -> (UploadId, JoinHandle<UploadOutcome>)
    where
        S: UploadSource + 'static,
    {
        let id = self.store.add_task(source.name(), source.len());
        let manager = self.clone();
        let category = category.into();

        let handle = tokio::spawn(async move { manager.run(id, &source, &category).await });
        (id, handle)
    }

    /// 上传调用方已经创建好的任务
    pub async fn run(&self, id: UploadId, source: &dyn UploadSource, category: &str) -> UploadOutcome {
        // 任务不存在说明已被移除，remove_task 同时取消了它
        let Some(task) = self.store.get_task(id) else {
            warn!(upload_id = %id, "task not found, nothing to upload");
            return UploadOutcome::Cancelled;
        };
        // 已经结束的任务不再上传，也不再发事件
        match task.status {
            UploadStatus::Success => {
                warn!(upload_id = %id, "task already succeeded, nothing to upload");
                return UploadOutcome::Success;
            }
            UploadStatus::Error => {
                warn!(upload_id = %id, error = ?task.error, "task already failed, nothing to upload");
                return UploadOutcome::Failed(ErrorKind::Unclassified);
            }
            UploadStatus::Uploading | UploadStatus::Cancelled => {}
        }

        self.store.update_task(id, TaskPatch::new().status(UploadStatus::Uploading));

        let chunks = ChunkPlan::new(source.len(), self.config.chunk_size)
            .map(|plan| plan.chunk_count())
            .unwrap_or_default();
        info!(
            upload_id = %id,
            file = source.name(),
            size = source.len(),
            chunks,
            category,
            "upload started"
        );

        let transmitter = ChunkTransmitter::new(self.store.clone(), self.transport.clone(), self.config.clone());
        match transmitter.transmit(id, source, category).await {
            TransmitOutcome::Completed { uploaded } => self.finish(id, uploaded, source.len()),
            TransmitOutcome::Cancelled { uploaded, chunks_sent } => {
                info!(upload_id = %id, uploaded, chunks_sent, "upload stopped before next chunk");
                self.mark_cancelled(id)
            }
            TransmitOutcome::Failed { error, chunk, uploaded } => {
                if error.cancelled || self.is_cancelled(id) {
                    info!(upload_id = %id, chunk, uploaded, "in-flight chunk aborted");
                    return self.mark_cancelled(id);
                }
                self.fail_with(id, chunk, &error)
            }
        }
    }

    fn is_cancelled(&self, id: UploadId) -> bool {
        self.store
            .get_task(id)
            .is_none_or(|task| task.status == UploadStatus::Cancelled)
    }

    fn finish(&self, id: UploadId, uploaded: u64, file_size: u64) -> UploadOutcome {
        // 最后一个分片发送期间被取消，保持取消状态。该分片已被确认，
        // 所以进度停在 100 而状态是 cancelled，这是预期的组合
        if self.is_cancelled(id) {
            return self.mark_cancelled(id);
        }

        let within_tolerance = uploaded.abs_diff(file_size) < self.config.completion_tolerance;
        if !(within_tolerance || uploaded >= file_size) {
            return self.fail(id, ErrorKind::Incomplete { expected: file_size, actual: uploaded });
        }

        self.store.update_task(
            id,
            TaskPatch::new()
                .progress(100)
                .speed(ZERO_SPEED)
                .status(UploadStatus::Success),
        );
        info!(upload_id = %id, uploaded, "upload completed");
        self.store.emit(UploadEvent::Completed { upload_id: id });
        self.schedule_cleanup(id);

        UploadOutcome::Success
    }

    fn schedule_cleanup(&self, id: UploadId) {
        let store = self.store.clone();
        let delay = self.config.cleanup_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store.remove_task(id);
        });
    }

    fn fail_with(&self, id: UploadId, chunk: usize, err: &TransportError) -> UploadOutcome {
        error!(
            upload_id = %id,
            chunk,
            status = ?err.status,
            payload = ?err.payload,
            error = %err,
            "chunk upload failed"
        );
        self.fail(id, ErrorKind::classify(err))
    }

    fn fail(&self, id: UploadId, kind: ErrorKind) -> UploadOutcome {
        let message = kind.message();
        self.store.update_task(
            id,
            TaskPatch::new().status(UploadStatus::Error).error(message.clone()),
        );
        warn!(upload_id = %id, kind = ?kind, "upload failed: {}", message);
        self.store.emit(UploadEvent::Failed { upload_id: id, kind, message });

        UploadOutcome::Failed(kind)
    }

    fn mark_cancelled(&self, id: UploadId) -> UploadOutcome {
        self.store.cancel_task(id);
        self.store.emit(UploadEvent::Cancelled { upload_id: id });
        UploadOutcome::Cancelled
    }
}

/// 上传管理器构建器
#[derive(Default)]
pub struct UploadManagerBuilder {
    store: Option<UploadStore>,
    transport: Option<Arc<dyn ChunkTransport>>,
    config: ChunkedConfig,
}

impl UploadManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 与其他组件共享同一个 store
    pub fn store(mut self, store: UploadStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ChunkTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: ChunkedConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<UploadManager> {
        let transport = self
            .transport
            .ok_or_else(|| TransferError::invalid_config("transport is required"))?;
        if self.config.chunk_size == 0 {
            return Err(TransferError::invalid_config("chunk_size must be greater than 0"));
        }

        Ok(UploadManager {
            store: self.store.unwrap_or_default(),
            transport,
            config: self.config,
        })
    }
}
