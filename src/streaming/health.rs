//! 流健康监控
//!
//! 为单个活动流跟踪 chunk 到达时间和大小，按需判断流是否
//! "停滞"（静默超时）或"超长"（总时长超时）。健康状态是查询时
//! 惰性计算的，没有后台定时器。

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use super::error::{
    ErrorSeverity, StreamingError, StreamingErrorType, STREAM_TIMEOUT_CODE, USER_MSG_TIMEOUT,
};

// ============================================================================
// 配置
// ============================================================================

/// 健康监控配置
///
/// 超时阈值由调用方在构造时提供；默认值对应聊天请求链路里
/// 观察到的 5s 静默 / 30s 总时长。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// 静默超时（毫秒）：两个 chunk 之间允许的最大间隔
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    /// 总时长超时（毫秒）：整个流允许的最大持续时间
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

fn default_silence_timeout_ms() -> u64 {
    5_000
}

fn default_total_timeout_ms() -> u64 {
    30_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
        }
    }
}

impl MonitorConfig {
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
}

// ============================================================================
// 健康检查结果与统计
// ============================================================================

/// 健康检查结果
///
/// 不健康时附带一个错误码为 `STREAM_002` 的超时错误。静默超时
/// 和总时长超时对调用方的报告完全一致，下游只认这一个码。
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// 流是否健康
    pub healthy: bool,
    /// 不健康时的错误对象
    pub error: Option<StreamingError>,
}

/// 流式传输统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    /// chunk 数量
    pub chunk_count: u64,
    /// 总字节数
    pub total_bytes: u64,
    /// 平均 chunk 大小（无 chunk 时为 0）
    pub avg_chunk_size: f64,
    /// 从流开始到现在的时长（毫秒）
    pub duration_ms: u64,
    /// 每秒 chunk 数（时长为 0 时为 0，不产生 Infinity/NaN）
    pub chunks_per_second: f64,
}

// ============================================================================
// 健康监控器
// ============================================================================

/// 单个流的健康监控器
///
/// 流开始时创建，流结束时随流丢弃，无需显式清理。同一实例的
/// 调用应来自同一个流处理任务；多任务并发修改同一实例属于
/// 调用方约定之外的用法。
#[derive(Debug)]
pub struct StreamHealthMonitor {
    chunk_count: u64,
    total_bytes: u64,
    start_time: Instant,
    last_chunk_time: Instant,
    config: MonitorConfig,
}

impl StreamHealthMonitor {
    /// 创建新的监控器
    pub fn new(config: MonitorConfig) -> Self {
        let now = Instant::now();
        Self {
            chunk_count: 0,
            total_bytes: 0,
            start_time: now,
            last_chunk_time: now,
            config,
        }
    }

    /// 使用显式超时创建监控器
    pub fn with_timeouts(silence_timeout_ms: u64, total_timeout_ms: u64) -> Self {
        Self::new(
            MonitorConfig::new()
                .with_silence_timeout_ms(silence_timeout_ms)
                .with_total_timeout_ms(total_timeout_ms),
        )
    }

    /// 获取配置
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// 记录收到一个 chunk
    pub fn record_chunk(&mut self, byte_size: usize) {
        self.chunk_count += 1;
        self.total_bytes += byte_size as u64;
        self.last_chunk_time = Instant::now();
    }

    /// chunk 数量
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// 总字节数
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// 按需检查流健康状态
    ///
    /// 健康 = 距上个 chunk 的静默时间和总时长都未超过阈值。
    pub fn check_health(&self) -> HealthCheck {
        let now = Instant::now();
        let silence_ms = now.duration_since(self.last_chunk_time).as_millis() as u64;
        let total_ms = now.duration_since(self.start_time).as_millis() as u64;

        if silence_ms < self.config.silence_timeout_ms && total_ms < self.config.total_timeout_ms {
            return HealthCheck {
                healthy: true,
                error: None,
            };
        }

        // 消息里保留 "timeout" 子串，经过分类器也会落到同一类型
        let error = StreamingError::new(
            StreamingErrorType::ConnectionTimeout,
            ErrorSeverity::Medium,
            format!(
                "stream timeout: {} ms de silence, {} ms au total ({} chunks)",
                silence_ms, total_ms, self.chunk_count
            ),
            USER_MSG_TIMEOUT,
            true,
        )
        .with_code(STREAM_TIMEOUT_CODE);

        HealthCheck {
            healthy: false,
            error: Some(error),
        }
    }

    /// 获取流式统计
    pub fn get_stats(&self) -> StreamStats {
        let duration_ms = self.start_time.elapsed().as_millis() as u64;

        let avg_chunk_size = if self.chunk_count == 0 {
            0.0
        } else {
            self.total_bytes as f64 / self.chunk_count as f64
        };

        let chunks_per_second = if duration_ms == 0 {
            0.0
        } else {
            self.chunk_count as f64 / (duration_ms as f64 / 1000.0)
        };

        StreamStats {
            chunk_count: self.chunk_count,
            total_bytes: self.total_bytes,
            avg_chunk_size,
            duration_ms,
            chunks_per_second,
        }
    }

    /// 记录最终统计到日志
    ///
    /// 指标由外部的可观测性消费方读取，这里只负责计算和输出。
    pub fn log_stats(&self, stream_id: Option<&str>) {
        let stats = self.get_stats();
        info!(
            stream_id = ?stream_id,
            chunk_count = stats.chunk_count,
            total_bytes = stats.total_bytes,
            avg_chunk_size = format!("{:.1}", stats.avg_chunk_size),
            duration_ms = stats.duration_ms,
            chunks_per_second = format!("{:.2}", stats.chunks_per_second),
            "流式传输指标"
        );
    }
}

impl Default for StreamHealthMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

// ============================================================================
// 测试模块
// ============================================================================
