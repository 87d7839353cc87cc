//! 带退避的重试编排
//!
//! 用有界重试和指数退避包装任意异步操作。重试资格由错误的
//! `code` 字段与调用方配置的白名单做精确匹配决定——与
//! `error` 模块基于子串启发式的展示层分类是两个独立的层。

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 中止信号对应的错误码
///
/// 携带此码的错误无论是否在白名单里都立即终止重试。
pub const ABORT_ERROR_CODE: &str = "ABORT_ERROR";

// ============================================================================
// 操作错误
// ============================================================================

/// 重试层的操作错误
///
/// 显式的 `code` 判别字段取代对任意对象形状的运行时探测；
/// 重试资格只看这个字段，不看消息文本。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct OperationError {
    /// 错误码（与 `RetryConfig::retryable_errors` 精确匹配）
    pub code: String,
    /// 错误消息
    pub message: String,
}

impl OperationError {
    /// 创建新的操作错误
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 创建中止错误
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ABORT_ERROR_CODE, message)
    }

    /// 是否为中止信号
    pub fn is_abort(&self) -> bool {
        self.code == ABORT_ERROR_CODE
    }
}

// ============================================================================
// 配置
// ============================================================================

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大重试次数（总尝试次数 = max_retries + 1）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// 基础退避延迟（毫秒）
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// 退避延迟上限（毫秒）
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// 退避倍率
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// 可重试的错误码白名单
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable_errors() -> Vec<String> {
    vec!["NETWORK_ERROR".to_string(), "CONNECTION_TIMEOUT".to_string()]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

impl RetryConfig {
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

    /// 设置退避延迟上限
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// 设置退避倍率
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// 设置可重试错误码白名单
    pub fn with_retryable_errors(mut self, codes: Vec<String>) -> Self {
        self.retryable_errors = codes;
        self
    }

    /// 计算第 `attempt` 次失败后的退避延迟
    ///
    /// `min(max_delay, base * multiplier^attempt)`，有上限封顶。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// 错误码是否在白名单里
    fn is_retryable_code(&self, code: &str) -> bool {
        self.retryable_errors.iter().any(|c| c == code)
    }
}

// ============================================================================
// 编排器
// ============================================================================

/// 重试编排器
pub struct RetryOrchestrator {
    config: RetryConfig,
}

impl RetryOrchestrator {
    /// 创建新的编排器
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 使用默认配置创建编排器
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// 获取配置
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 执行带重试的异步操作
    ///
    /// 成功立即返回。失败时按 `code` 判断：不在白名单或携带
    /// 中止码则立即拒绝；否则退避后重试，总尝试次数精确为
    /// `max_retries + 1`，耗尽后以最后一次的错误拒绝。
    pub async fn retry<T, F, Fut>(&self, mut operation: F) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_abort() {
                        debug!(code = %err.code, "操作被中止，不再重试");
                        return Err(err);
                    }
                    if !self.config.is_retryable_code(&err.code) {
                        debug!(code = %err.code, "错误码不在白名单，不重试");
                        return Err(err);
                    }
                    if attempt >= self.config.max_retries {
                        warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.max_retries,
                            code = %err.code,
                            "重试次数耗尽"
                        );
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        code = %err.code,
                        "可重试错误，退避后重试"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryOrchestrator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(1)
            .with_max_delay_ms(5)
            .with_retryable_errors(vec!["NETWORK_ERROR".to_string()])
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let orchestrator = RetryOrchestrator::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = orchestrator
            .retry(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, OperationError>(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_two_retryable_failures() {
        let orchestrator = RetryOrchestrator::new(fast_config().with_max_retries(3));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = orchestrator
            .retry(move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(OperationError::new("NETWORK_ERROR", "connexion perdue"))
                    } else {
                        Ok("réponse")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "réponse");
        // 2 échecs + 1 succès = exactement 3 appels
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_code_fails_immediately() {
        let orchestrator = RetryOrchestrator::new(fast_config().with_max_retries(5));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = orchestrator
            .retry(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(OperationError::new("VALIDATION_ERROR", "entrée invalide"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_rejects_with_last_error() {
        let orchestrator = RetryOrchestrator::new(fast_config().with_max_retries(2));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = orchestrator
            .retry(move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err(OperationError::new(
                        "NETWORK_ERROR",
                        format!("échec numéro {}", n + 1),
                    ))
                }
            })
            .await;

        let err = result.unwrap_err();
        // 1 + 2 retries = 3 appels, et c'est bien la DERNIÈRE erreur qui sort
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.message, "échec numéro 3");
    }

    #[tokio::test]
    async fn test_abort_short_circuits_even_when_whitelisted() {
        // 白名单里显式放入中止码也不能让它被重试
        let config = fast_config()
            .with_max_retries(5)
            .with_retryable_errors(vec![ABORT_ERROR_CODE.to_string()]);
        let orchestrator = RetryOrchestrator::new(config);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = orchestrator
            .retry(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(OperationError::aborted("annulé par l'utilisateur"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_abort());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1_000)
            .with_max_delay_ms(3_000)
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2_000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(3_000));
        // 封顶之后不再增长
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(3_000));
    }

    #[test]
    fn test_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!(config.retryable_errors.contains(&"NETWORK_ERROR".to_string()));
    }

    #[test]
    fn test_operation_error_display() {
        let err = OperationError::new("NETWORK_ERROR", "connexion perdue");
        assert_eq!(err.to_string(), "NETWORK_ERROR: connexion perdue");
    }
}
