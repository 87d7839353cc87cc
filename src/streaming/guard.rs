//! 受控流包装器
//!
//! 把健康监控、额度门控和进程级健康聚合绑到一个字节流上：
//! 每个 chunk 的大小喂给健康监控器、按配置的单价扣减额度；
//! 每次轮询时惰性复查健康状态，停滞或超长的流以 `STREAM_002`
//! 错误终止，额度耗尽的流在转发下一个 chunk 之前终止。已经
//! 转发给消费方的部分数据不回滚，是否接受部分答案由调用层决定。

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::{debug, warn};

use super::aggregator::GlobalHealthAggregator;
use super::credits::CreditsAwareStream;
use super::error::{
    ErrorSeverity, StreamingError, StreamingErrorType, CREDITS_EXHAUSTED_CODE, USER_MSG_CREDITS,
};
use super::health::{MonitorConfig, StreamHealthMonitor};
use super::source::ByteStream;

// ============================================================================
// 配置
// ============================================================================

/// 受控流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamGuardConfig {
    /// 静默超时（毫秒）
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    /// 总时长超时（毫秒）
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,

    /// 每个 chunk 消耗的额度
    #[serde(default = "default_credit_cost_per_chunk")]
    pub credit_cost_per_chunk: u64,
}

fn default_silence_timeout_ms() -> u64 {
    5_000
}

fn default_total_timeout_ms() -> u64 {
    30_000
}

fn default_credit_cost_per_chunk() -> u64 {
    1
}

impl Default for StreamGuardConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
            credit_cost_per_chunk: default_credit_cost_per_chunk(),
        }
    }
}

impl StreamGuardConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置静默超时
    pub fn with_silence_timeout_ms(mut self, ms: u64) -> Self {
        self.silence_timeout_ms = ms;
        self
    }

    /// 设置总时长超时
    pub fn with_total_timeout_ms(mut self, ms: u64) -> Self {
        self.total_timeout_ms = ms;
        self
    }

    /// 设置每 chunk 的额度单价
    pub fn with_credit_cost_per_chunk(mut self, cost: u64) -> Self {
        self.credit_cost_per_chunk = cost;
        self
    }

    /// 派生健康监控配置
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new()
            .with_silence_timeout_ms(self.silence_timeout_ms)
            .with_total_timeout_ms(self.total_timeout_ms)
    }
}

// ============================================================================
// 受控流
// ============================================================================

/// 受控字节流
///
/// 包装源流并在转发过程中执行健康与额度检查。监控器和额度
/// 门控随流创建、随流丢弃；聚合器是跨流共享的，在流终止时
/// 收到一条通过/失败 + 耗时样本。
pub struct GuardedStream {
    source: ByteStream,
    monitor: StreamHealthMonitor,
    credits: Option<CreditsAwareStream>,
    aggregator: Option<Arc<GlobalHealthAggregator>>,
    config: StreamGuardConfig,
    stream_id: Option<String>,
    started_at: Instant,
    limit_warned: bool,
    finished: bool,
}

impl GuardedStream {
    /// 创建新的受控流
    pub fn new(source: ByteStream, config: StreamGuardConfig) -> Self {
        let monitor = StreamHealthMonitor::new(config.monitor_config());
        Self {
            source,
            monitor,
            credits: None,
            aggregator: None,
            config,
            stream_id: None,
            started_at: Instant::now(),
            limit_warned: false,
            finished: false,
        }
    }

    /// 附加额度门控
    pub fn with_credits(mut self, credits: CreditsAwareStream) -> Self {
        self.credits = Some(credits);
        self
    }

    /// 附加共享的健康聚合器
    pub fn with_aggregator(mut self, aggregator: Arc<GlobalHealthAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// 附加流标识（日志用）
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    /// 访问健康监控器
    pub fn monitor(&self) -> &StreamHealthMonitor {
        &self.monitor
    }

    /// 访问额度门控
    pub fn credits(&self) -> Option<&CreditsAwareStream> {
        self.credits.as_ref()
    }

    /// 流是否已终止
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 终止流：记录最终指标并向聚合器上报样本
    fn finish(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.monitor.log_stats(self.stream_id.as_deref());

        if let Some(aggregator) = &self.aggregator {
            aggregator.record_health_check(success, self.started_at.elapsed().as_millis() as u64);
        }

        debug!(
            stream_id = ?self.stream_id,
            success,
            "受控流终止"
        );
    }

    /// 构造额度耗尽错误
    fn credits_exhausted_error(&self) -> StreamingError {
        let user_id = self
            .credits
            .as_ref()
            .map(|c| c.user_id().to_string())
            .unwrap_or_default();
        StreamingError::new(
            StreamingErrorType::UnknownError,
            ErrorSeverity::High,
            format!("credits exhausted for user {}", user_id),
            USER_MSG_CREDITS,
            false,
        )
        .with_code(CREDITS_EXHAUSTED_CODE)
    }
}

impl Stream for GuardedStream {
    type Item = Result<Bytes, StreamingError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        // 健康状态惰性复查：每次被轮询时评估一次
        let check = this.monitor.check_health();
        if let Some(error) = check.error {
            this.finish(false);
            return Poll::Ready(Some(Err(error)));
        }

        // 额度门控：预算耗尽就在转发下一个 chunk 之前停下
        if let Some(credits) = &this.credits {
            if !credits.can_continue_streaming() {
                let error = this.credits_exhausted_error();
                this.finish(false);
                return Poll::Ready(Some(Err(error)));
            }
        }

        match Pin::new(&mut this.source).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.monitor.record_chunk(bytes.len());

                if let Some(credits) = &mut this.credits {
                    credits.record_credits_used(this.config.credit_cost_per_chunk);
                    if !this.limit_warned && credits.is_approaching_limit() {
                        this.limit_warned = true;
                        warn!(
                            stream_id = ?this.stream_id,
                            user_id = credits.user_id(),
                            remaining = credits.get_remaining_credits(),
                            "流式额度接近耗尽"
                        );
                    }
                }

                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.finish(false);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
