use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::ErrorKind;

/// 默认分片大小 49 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 49 * 1024 * 1024;

/// 成功后自动移除任务的延迟
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(3000);

/// 完成校验允许的字节误差
pub const DEFAULT_COMPLETION_TOLERANCE: u64 = 1024;

// 用于序列化 Duration（毫秒）
fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(pub Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 上传状态
///
/// `Uploading` 是唯一的非终止状态，其余三个状态一旦进入就不再改变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 上传中
    Uploading,
    /// 已完成
    Success,
    /// 失败
    Error,
    /// 已取消
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadStatus::Uploading)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadStatus::Uploading => "uploading",
            UploadStatus::Success => "success",
            UploadStatus::Error => "error",
            UploadStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 上传任务快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    /// 任务 ID
    pub id: UploadId,
    /// 文件名
    pub file_name: String,
    /// 文件大小
    pub file_size: u64,
    /// 当前状态
    pub status: UploadStatus,
    /// 完成百分比 0-100
    pub progress: u8,
    /// 显示用速度，例如 "12.34 MB/s"
    pub speed: String,
    /// 错误信息，仅在 `status == Error` 时存在
    pub error: Option<String>,
    /// 界面是否折叠
    pub minimized: bool,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl UploadTask {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            id: UploadId::new(),
            file_name: file_name.into(),
            file_size,
            status: UploadStatus::Uploading,
            progress: 0,
            speed: crate::utils::ZERO_SPEED.to_string(),
            error: None,
            minimized: false,
            created_at: Utc::now(),
        }
    }

    /// 合并部分字段，返回是否有字段发生变化
    ///
    /// 终止状态不可再迁移：对终止任务的 status/error 修改会被忽略。
    pub fn apply(&mut self, patch: TaskPatch) -> bool {
        let mut changed = false;

        if let Some(progress) = patch.progress {
            let progress = progress.min(100);
            if self.progress != progress {
                self.progress = progress;
                changed = true;
            }
        }

        if let Some(speed) = patch.speed {
            if self.speed != speed {
                self.speed = speed;
                changed = true;
            }
        }

        if self.status.is_terminal() {
            return changed;
        }

        if let Some(status) = patch.status {
            if self.status != status {
                self.status = status;
                changed = true;
            }
        }

        if let Some(error) = patch.error {
            if self.error != error {
                self.error = error;
                changed = true;
            }
        }

        changed
    }
}

/// `UploadStore::update_task` 的部分字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    pub speed: Option<String>,
    pub error: Option<Option<String>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: UploadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn speed(mut self, speed: impl Into<String>) -> Self {
        self.speed = Some(speed.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(Some(message.into()));
        self
    }
}

/// 分片上传配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkedConfig {
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 成功后多久从 store 中移除
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub cleanup_delay: Duration,
    /// 完成校验允许的字节误差
    pub completion_tolerance: u64,
    /// 取消时是否中断正在发送的分片
    pub abort_in_flight: bool,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            completion_tolerance: DEFAULT_COMPLETION_TOLERANCE,
            abort_in_flight: false,
        }
    }
}

/// 一次上传的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    Failed(ErrorKind),
    Cancelled,
}

impl UploadOutcome {
    pub fn status(&self) -> UploadStatus {
        match self {
            UploadOutcome::Success => UploadStatus::Success,
            UploadOutcome::Failed(_) => UploadStatus::Error,
            UploadOutcome::Cancelled => UploadStatus::Cancelled,
        }
    }
}

/// 上传事件
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 任务已添加
    TaskAdded {
        upload_id: UploadId,
        file_name: String,
    },
    /// 状态变更
    StateChanged {
        upload_id: UploadId,
        old_state: UploadStatus,
        new_state: UploadStatus,
    },
    /// 任务完成
    Completed {
        upload_id: UploadId,
    },
    /// 任务失败
    Failed {
        upload_id: UploadId,
        kind: ErrorKind,
        message: String,
    },
    /// 任务已取消
    Cancelled {
        upload_id: UploadId,
    },
    /// 任务已从 store 中移除
    Removed {
        upload_id: UploadId,
    },
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadTask>();
        assert_send::<UploadEvent>();
        assert_send::<UploadOutcome>();
    }
};
