use std::path::{Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use crate::core::{Result, TransferError, UploadSource};

fn check_range(start: u64, end: u64, len: u64) -> Result<()> {
    if start > end || end > len {
        return Err(TransferError::ChunkOutOfRange { start, end, len });
    }
    Ok(())
}

/// 本地文件
///
/// 每个分片单独打开文件并定位读取，内存中同时只保留一个分片。
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFile(format!("can't read file name of {}", path.display())))?
            .to_string();

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidFile(format!("{} is not a file", path.display())));
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            len: metadata.len(),
        })
    }

    /// 覆盖上传时使用的文件名
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        check_range(start, end, self.len)?;

        let mut file = File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }
}

/// 内存中的数据
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        check_range(start, end, self.len())?;
        Ok(self.data.slice(start as usize..end as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_source_reads_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        file.write_all(&data).unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.len(), 1000);

        let chunk = source.read_range(100, 300).await.unwrap();
        assert_eq!(&chunk[..], &data[100..300]);

        let tail = source.read_range(900, 1000).await.unwrap();
        assert_eq!(&tail[..], &data[900..]);
    }

    #[tokio::test]
    async fn test_out_of_range_is_rejected() {
        let source = MemorySource::new("m.bin", vec![0u8; 10]);
        let err = source.read_range(5, 11).await.unwrap_err();
        assert!(matches!(err, TransferError::ChunkOutOfRange { start: 5, end: 11, len: 10 }));
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidFile(_)));
    }

    #[tokio::test]
    async fn test_with_name_overrides_file_name() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = FileSource::open(file.path()).await.unwrap().with_name("renamed.iso");
        assert_eq!(source.name(), "renamed.iso");
        assert!(source.is_empty());
    }
}
