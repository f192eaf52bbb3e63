//! Dev only
//!
//! 只在 debug 构建或开启 `diagnostics` feature 时编译，需要显式传入 store 创建。

use tracing::debug;
use super::errors::{Result, TransferError};
use super::store::UploadStore;
use super::types::{TaskPatch, UploadId};

pub struct UploadDiagnostics {
    store: UploadStore,
}

impl UploadDiagnostics {
    pub fn new(store: UploadStore) -> Self {
        Self { store }
    }

    /// 当前所有任务的 JSON
    pub fn snapshot_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.store.tasks())
            .map_err(|e| TransferError::internal(format!("serialize tasks: {e}")))
    }

    pub fn log_tasks(&self) {
        for task in self.store.tasks() {
            debug!(
                upload_id = %task.id,
                file = %task.file_name,
                status = %task.status,
                progress = task.progress,
                speed = %task.speed,
                minimized = task.minimized,
                "task"
            );
        }
    }

    /// 插入一个假任务，用于调试渲染
    pub fn inject_task(&self, file_name: &str, file_size: u64, progress: u8) -> UploadId {
        let id = self.store.add_task(file_name, file_size);
        self.store.update_task(id, TaskPatch::new().progress(progress.min(99)));
        id
    }
}
