use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use super::errors::{Result, TransportError};

/// 单个分片请求的内容
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    /// 分片序号，从 0 开始
    pub index: usize,
    /// 分片数据 `[start, end)`
    pub bytes: Bytes,
    /// 原始文件名
    pub file_name: String,
    /// 本次传输的开始时间（Unix 毫秒）
    pub start_time: i64,
    /// 调用方提供的分类标签
    pub category: String,
    /// 最后一个分片，远端收到后开始合并
    pub is_last: bool,
}

/// 当前请求的上传字节数上报
///
/// 传输层每发出一段数据就调用一次 `report`，值是本次请求内已发送的字节数。
#[derive(Debug, Clone)]
pub struct ChunkProgress {
    tx: mpsc::UnboundedSender<u64>,
}

impl ChunkProgress {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, loaded: u64) {
        // 接收端已结束说明分片已经处理完，丢弃即可
        let _ = self.tx.send(loaded);
    }
}

/// 分片传输 trait - HTTP 实现与测试用的模拟实现都走这里
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// 发送一个分片，非 2xx 或网络错误返回 `TransportError`
    ///
    /// `cancel` 被触发时实现应尽快放弃请求并返回 `TransportError::cancelled()`。
    async fn send_chunk(
        &self,
        payload: ChunkPayload,
        progress: ChunkProgress,
        cancel: CancellationToken,
    ) -> std::result::Result<(), TransportError>;
}

/// 上传数据源
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// 文件名
    fn name(&self) -> &str;

    /// 总字节数
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取 `[start, end)`
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes>;
}
