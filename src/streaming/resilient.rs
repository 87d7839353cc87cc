//! 弹性流工厂
//!
//! 对流的*建立*做有界重试：工厂函数失败时经分类器归类，可重试
//! 则按不封顶的倍增退避再次尝试建立。一旦流成功交给调用方，
//! 传输途中的数据丢失不在本组件职责内（不做断点续传）。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::{StreamingError, StreamingErrorHandler};
use super::source::{BoxError, ByteStream};

// ============================================================================
// 配置
// ============================================================================

/// 弹性流工厂配置
///
/// 注意：这里的退避是 `base * 2^attempt`、刻意不封顶，与
/// `RetryOrchestrator` 的封顶策略是两个独立的既定行为，
/// 不要统一。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilientConfig {
    /// 最大重试次数（总尝试次数 = max_retries + 1）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// 基础退避延迟（毫秒），每次尝试翻倍
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

impl Default for ResilientConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl ResilientConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置最大重试次数
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 设置基础退避延迟
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// 第 `attempt` 次失败后的退避延迟：`base * 2^attempt`
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 指数上限只是防御 u64 溢出，正常配置远达不到
        let factor = 1u64 << attempt.min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

// ============================================================================
// 工厂
// ============================================================================

/// 弹性流工厂
///
/// 持有共享的错误处理器：每次建立失败都会被分类、计入历史并
/// 按严重级别写日志。
pub struct ResilientStreamFactory {
    handler: Arc<StreamingErrorHandler>,
    config: ResilientConfig,
}

impl ResilientStreamFactory {
    /// 创建新的工厂
    pub fn new(handler: Arc<StreamingErrorHandler>, config: ResilientConfig) -> Self {
        Self { handler, config }
    }

    /// 使用默认配置创建工厂
    pub fn with_defaults(handler: Arc<StreamingErrorHandler>) -> Self {
        Self::new(handler, ResilientConfig::default())
    }

    /// 获取配置
    pub fn config(&self) -> &ResilientConfig {
        &self.config
    }

    /// 通过工厂函数建立一个弹性流
    ///
    /// 失败时经分类器归类：不可重试（包括中止）或尝试耗尽则以
    /// 分类后的错误拒绝，调用方最终只看到最后一个错误。
    pub async fn create_resilient_stream<F, Fut>(
        &self,
        mut factory: F,
    ) -> Result<ByteStream, StreamingError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<ByteStream, BoxError>>,
    {
        let mut attempt = 0u32;

        loop {
            match factory().await {
                Ok(stream) => {
                    debug!(attempt = attempt + 1, "流建立成功");
                    return Ok(stream);
                }
                Err(err) => {
                    let mut context = HashMap::new();
                    context.insert("attempt".to_string(), (attempt + 1).to_string());
                    let classified = self.handler.handle(err.as_ref(), Some(context));

                    if !classified.retryable || attempt >= self.config.max_retries {
                        warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.max_retries,
                            error_type = classified.error_type.as_str(),
                            retryable = classified.retryable,
                            "流建立失败，停止重试"
                        );
                        return Err(classified);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "流建立失败，退避后重试"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::error::StreamingErrorType;
    use crate::streaming::source::collect_bytes;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_factory(handler: Arc<StreamingErrorHandler>, max_retries: u32) -> ResilientStreamFactory {
        ResilientStreamFactory::new(
            handler,
            ResilientConfig::new()
                .with_max_retries(max_retries)
                .with_base_delay_ms(1),
        )
    }

    fn ok_stream() -> ByteStream {
        Box::pin(stream::iter(vec![Ok(Bytes::from("données"))]))
    }

    fn network_failure() -> BoxError {
        Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "network unreachable",
        ))
    }

    #[tokio::test]
    async fn test_creation_succeeds_after_transient_failures() {
        let handler = Arc::new(StreamingErrorHandler::new());
        let factory = fast_factory(handler.clone(), 3);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let stream = factory
            .create_resilient_stream(move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(network_failure())
                    } else {
                        Ok(ok_stream())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // les deux échecs classifiés ont bien atterri dans l'historique
        assert_eq!(handler.history_len(), 2);

        let body = collect_bytes(stream).await.unwrap();
        assert_eq!(body, "données".as_bytes());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_stops_immediately() {
        let handler = Arc::new(StreamingErrorHandler::new());
        let factory = fast_factory(handler, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = factory
            .create_resilient_stream(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<ByteStream, BoxError>(Box::new(std::io::Error::other(
                        "HTTP 404 not found",
                    )))
                }
            })
            .await
            .err()
            .unwrap();

        assert_eq!(err.error_type, StreamingErrorType::ApiError);
        assert!(!err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_is_terminal() {
        // 中止必须立即终止建立重试，不管配置允许多少次
        let handler = Arc::new(StreamingErrorHandler::new());
        let factory = fast_factory(handler, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = factory
            .create_resilient_stream(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<ByteStream, BoxError>(Box::new(std::io::Error::other(
                        "request aborted by caller",
                    )))
                }
            })
            .await
            .err()
            .unwrap();

        assert_eq!(err.error_type, StreamingErrorType::AbortError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_classified_error() {
        let handler = Arc::new(StreamingErrorHandler::new());
        let factory = fast_factory(handler, 2);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = factory
            .create_resilient_stream(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<ByteStream, BoxError>(network_failure())
                }
            })
            .await
            .err()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.error_type, StreamingErrorType::NetworkError);
        assert_eq!(
            err.context.as_ref().and_then(|ctx| ctx.get("attempt")).map(String::as_str),
            Some("3")
        );
    }

    #[test]
    fn test_uncapped_doubling_backoff() {
        let config = ResilientConfig::new().with_base_delay_ms(1_000);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2_000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4_000));
        // pas de plafond : continue de doubler
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(32_000));
    }
}
