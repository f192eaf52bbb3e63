use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::ChunkProgress;

/// 每次交给 HTTP 客户端的数据块大小
pub(crate) const UPLOAD_PIECE: usize = 64 * 1024;

pin_project! {
    /// 统计已发送字节并上报的请求体
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        progress: ChunkProgress,
        loaded: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, progress: ChunkProgress) -> Self {
        Self {
            inner,
            progress,
            loaded: 0,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(piece))) => {
                if !piece.is_empty() {
                    *this.loaded += piece.len() as u64;
                    this.progress.report(*this.loaded);
                }
                Poll::Ready(Some(Ok(piece)))
            }
            other => other,
        }
    }
}

/// 把分片拆成小块，便于按块上报进度
pub(crate) fn split_pieces(bytes: Bytes) -> impl Stream<Item = std::io::Result<Bytes>> {
    let len = bytes.len();
    let pieces: Vec<std::io::Result<Bytes>> = (0..len)
        .step_by(UPLOAD_PIECE)
        .map(|start| Ok(bytes.slice(start..(start + UPLOAD_PIECE).min(len))))
        .collect();

    futures::stream::iter(pieces)
}
