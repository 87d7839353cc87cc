//! chifa-stream
//!
//! 药房咨询聊天服务的流式弹性核心。聊天回答经外部 Agent 服务
//! 以流式 HTTP 响应返回，本 crate 负责这条链路的稳定性：
//!
//! - 把异构的底层失败归类为统一的 [`StreamingError`]，附带
//!   面向用户的法语提示与 HTTP 状态映射
//! - 监控单个流的停滞与超时（[`StreamHealthMonitor`]）
//! - 按 chunk 扣减并门控用户额度（[`CreditsAwareStream`]）
//! - 对操作与流建立分别做带退避的有界重试
//!   （[`RetryOrchestrator`] / [`ResilientStreamFactory`]）
//! - 汇总跨流健康样本用于系统性退化检测
//!   （[`GlobalHealthAggregator`]）
//!
//! 所有组件都由组装根显式构造、按需以 `Arc` 共享，不依赖
//! 全局单例。

pub mod streaming;

pub use streaming::{
    classify_message, collect_bytes, response_to_byte_stream, BoxError, ByteStream,
    CreditsAwareStream, ErrorSeverity, ErrorStats, GlobalHealthAggregator, GuardedStream,
    HealthCheck, HealthCheckSample, HealthStatusSummary, MonitorConfig, OperationError,
    ResilientConfig, ResilientStreamFactory, RetryConfig, RetryOrchestrator, StreamGuardConfig,
    StreamHealthMonitor, StreamStats, StreamingError, StreamingErrorHandler, StreamingErrorType,
    SystemIssueReport, ABORT_ERROR_CODE, CREDITS_EXHAUSTED_CODE, STREAM_TIMEOUT_CODE,
};
