use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Chunk out of range: {start}..{end} of {len}")]
    ChunkOutOfRange {
        start: u64,
        end: u64,
        len: u64,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

/// 传输层拒绝一个分片请求时给出的错误
///
/// 字段对应远端错误对象上可能出现的 `status`、`message`、`error`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
    pub payload: Option<String>,
    pub cancelled: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            payload: None,
            cancelled: false,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::new("request aborted: upload cancelled")
        }
    }

    /// 读取分片数据失败也按传输错误处理
    pub fn from_source(err: &TransferError) -> Self {
        Self::new(format!("failed to read chunk: {err}"))
    }
}

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out"];
const STORAGE_MISSING_MARKERS: &[&str] = &["storage does not exist", "storage not exist"];

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 5xx
    ServerFault,
    /// 请求超时
    Timeout,
    /// 后端报告存储不存在
    StorageMissing,
    /// 其他错误
    Unclassified,
    /// 所有分片都已发送，但字节数校验没有通过
    Incomplete {
        expected: u64,
        actual: u64,
    },
}

impl ErrorKind {
    /// 按顺序匹配：5xx、超时、存储不存在，最后兜底
    pub fn classify(err: &TransportError) -> Self {
        if matches!(err.status, Some(status) if (500..600).contains(&status)) {
            return ErrorKind::ServerFault;
        }

        let message = err.message.to_lowercase();
        if TIMEOUT_MARKERS.iter().any(|m| message.contains(m)) {
            return ErrorKind::Timeout;
        }

        let payload = err.payload.as_deref().unwrap_or_default().to_lowercase();
        if STORAGE_MISSING_MARKERS
            .iter()
            .any(|m| payload.contains(m) || message.contains(m))
        {
            return ErrorKind::StorageMissing;
        }

        ErrorKind::Unclassified
    }

    pub fn message(&self) -> String {
        match self {
            ErrorKind::ServerFault => {
                "Server error: check that the storage has enough free space and the upload path is valid".to_string()
            }
            ErrorKind::Timeout => {
                "Upload timed out: check your network connection and try again".to_string()
            }
            ErrorKind::StorageMissing => {
                "Storage does not exist: configure the target storage before uploading".to_string()
            }
            ErrorKind::Unclassified => "Upload failed, please retry".to_string(),
            ErrorKind::Incomplete { expected, actual } => {
                format!("Upload incomplete: sent {actual} of {expected} bytes")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_fault_wins_over_message() {
        let err = TransportError::http(503, "gateway timeout");
        assert_eq!(ErrorKind::classify(&err), ErrorKind::ServerFault);
    }

    #[test]
    fn test_timeout_from_message() {
        let err = TransportError::new("operation timed out");
        assert_eq!(ErrorKind::classify(&err), ErrorKind::Timeout);

        let err = TransportError::new("Request Timeout exceeded");
        assert_eq!(ErrorKind::classify(&err), ErrorKind::Timeout);
    }

    #[test]
    fn test_storage_missing_from_payload() {
        let err = TransportError::http(400, "Bad Request")
            .with_payload("target Storage does not exist: /mnt/a");
        assert_eq!(ErrorKind::classify(&err), ErrorKind::StorageMissing);
    }

    #[test]
    fn test_unclassified_fallback() {
        let err = TransportError::http(403, "Forbidden");
        assert_eq!(ErrorKind::classify(&err), ErrorKind::Unclassified);
        assert_eq!(ErrorKind::Unclassified.message(), "Upload failed, please retry");
    }

    #[test]
    fn test_incomplete_message_mentions_counts() {
        let kind = ErrorKind::Incomplete { expected: 4096, actual: 1024 };
        let message = kind.message();
        assert!(message.starts_with("Upload incomplete"));
        assert!(message.contains("1024"));
        assert!(message.contains("4096"));
    }
}
