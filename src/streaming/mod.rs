//! 流式弹性核心模块
//!
//! 聊天请求链路的流式传输保障层：错误分类、逐 chunk 健康监控、
//! 额度门控、带退避的重试以及进程级健康聚合。
//!
//! # 主要组件
//!
//! - `error`: 流式错误类型、消息分类器与错误处理器
//! - `health`: 单流健康监控（静默/总时长超时 + 吞吐统计）
//! - `credits`: 会话级额度追踪与门控
//! - `retry`: 基于错误码白名单的通用重试编排
//! - `resilient`: 流建立阶段的弹性重试工厂
//! - `aggregator`: 跨流健康样本聚合
//! - `guard`: 把监控、额度与聚合绑到字节流上的包装器
//! - `source`: 统一字节流类型与 reqwest 适配

pub mod aggregator;
pub mod credits;
pub mod error;
pub mod guard;
pub mod health;
pub mod resilient;
pub mod retry;
pub mod source;

// 重新导出核心类型
pub use aggregator::{GlobalHealthAggregator, HealthCheckSample, HealthStatusSummary};
pub use credits::CreditsAwareStream;
pub use error::{
    classify_message, ErrorSeverity, ErrorStats, StreamingError, StreamingErrorHandler,
    StreamingErrorType, SystemIssueReport, CREDITS_EXHAUSTED_CODE, STREAM_TIMEOUT_CODE,
};
pub use guard::{GuardedStream, StreamGuardConfig};
pub use health::{HealthCheck, MonitorConfig, StreamHealthMonitor, StreamStats};
pub use resilient::{ResilientConfig, ResilientStreamFactory};
pub use retry::{OperationError, RetryConfig, RetryOrchestrator, ABORT_ERROR_CODE};
pub use source::{collect_bytes, response_to_byte_stream, BoxError, ByteStream};
