//! 流来源类型与适配
//!
//! 定义核心统一消费的字节流类型，并提供把 `reqwest` 的流式
//! 响应体适配为该类型的辅助函数。

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use super::error::StreamingError;

/// 创建流时可能抛出的任意底层错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 统一的异步字节流类型
///
/// 每个 Item 是一个 chunk 的字节数据或一个已分类的错误。
/// 使用 `Pin<Box<...>>` 以支持动态分发和异步迭代。
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamingError>> + Send>>;

/// 将 reqwest 的响应体转换为 `ByteStream`
///
/// 聊天请求链路通过 HTTP 流式响应体消费外部 Agent 服务，
/// 这里把 reqwest 的错误就地转成 `StreamingError`。
pub fn response_to_byte_stream(response: reqwest::Response) -> ByteStream {
    let stream = response
        .bytes_stream()
        .map(|result| result.map_err(StreamingError::from));
    Box::pin(stream)
}

/// 从字节流中收集全部内容
///
/// 用于测试和非流式回退场景。
pub async fn collect_bytes<S>(mut stream: S) -> Result<Vec<u8>, StreamingError>
where
    S: Stream<Item = Result<Bytes, StreamingError>> + Unpin,
{
    let mut content = Vec::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(bytes) => content.extend_from_slice(&bytes),
            Err(e) => return Err(e),
        }
    }
    Ok(content)
}

// ============================================================================
// 测试模块
// ============================================================================
