//! 流式传输错误分类
//!
//! 定义流式传输过程中的统一错误对象，并提供把任意底层失败
//! （网络异常、HTTP 状态、超时、中止信号）归类为带严重级别、
//! 可重试标记和用户提示文案的 `StreamingError` 的分类器。
//!
//! 分类器本身是全函数：无论输入是什么都返回一个值，永远不会
//! 自己抛出错误，调用方因此不可能"漏掉"错误处理。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{error, info, warn};

/// 错误历史的最大长度（环形缓冲，最旧的先被淘汰）
const MAX_ERROR_HISTORY: usize = 50;

/// 统计中保留的最近错误数量
const RECENT_ERRORS_IN_STATS: usize = 5;

/// 系统性问题检测的时间窗口（秒）
const SYSTEM_ISSUE_WINDOW_SECS: i64 = 300;

/// 流式超时错误的统一错误码
///
/// 静默超时和总时长超时对下游使用同一个码，消费方只认这一个码。
pub const STREAM_TIMEOUT_CODE: &str = "STREAM_002";

/// 额度耗尽的错误码（由调用层映射为 402）
pub const CREDITS_EXHAUSTED_CODE: &str = "CREDITS_EXHAUSTED";

// ============================================================================
// 面向用户的提示文案（法语，产品目标市场）
// ============================================================================

pub(crate) const USER_MSG_ABORTED: &str = "Opération annulée par l'utilisateur.";
pub(crate) const USER_MSG_TIMEOUT: &str =
    "La réponse a pris trop de temps. Veuillez réessayer.";
pub(crate) const USER_MSG_NETWORK: &str =
    "Problème de connexion réseau. Vérifiez votre connexion internet.";
pub(crate) const USER_MSG_SESSION_EXPIRED: &str =
    "Votre session a expiré. Veuillez vous reconnecter.";
pub(crate) const USER_MSG_ACCESS_DENIED: &str =
    "Accès refusé. Contactez votre administrateur.";
pub(crate) const USER_MSG_RATE_LIMITED: &str =
    "Trop de requêtes. Veuillez patienter un instant.";
pub(crate) const USER_MSG_SERVER_ERROR: &str =
    "Erreur du serveur. Veuillez réessayer plus tard.";
pub(crate) const USER_MSG_UNAVAILABLE: &str =
    "Service temporairement indisponible. Veuillez réessayer.";
pub(crate) const USER_MSG_BAD_REQUEST: &str =
    "Requête invalide. Veuillez reformuler votre question.";
pub(crate) const USER_MSG_API_GENERIC: &str =
    "Erreur du service. Veuillez réessayer.";
pub(crate) const USER_MSG_PARSING: &str =
    "Erreur lors du traitement de la réponse. Veuillez réessayer.";
pub(crate) const USER_MSG_BUFFER: &str =
    "La réponse est trop volumineuse. Veuillez affiner votre question.";
pub(crate) const USER_MSG_UNKNOWN: &str =
    "Une erreur inattendue s'est produite. Veuillez réessayer.";
pub(crate) const USER_MSG_CREDITS: &str =
    "Crédits épuisés. Veuillez recharger votre compte pour continuer.";

// ============================================================================
// 错误类型与严重级别
// ============================================================================

/// 流式传输错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamingErrorType {
    /// 连接或响应超时
    ConnectionTimeout,
    /// 网络错误（连接失败、DNS 解析失败、连接被重置）
    NetworkError,
    /// 上游 API 返回错误响应
    ApiError,
    /// 响应数据无法解析
    ParsingError,
    /// 响应超过缓冲区限制
    BufferOverflow,
    /// 调用方主动中止
    AbortError,
    /// 其他未知错误
    UnknownError,
}

impl StreamingErrorType {
    /// 获取错误类型的标识字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamingErrorType::ConnectionTimeout => "CONNECTION_TIMEOUT",
            StreamingErrorType::NetworkError => "NETWORK_ERROR",
            StreamingErrorType::ApiError => "API_ERROR",
            StreamingErrorType::ParsingError => "PARSING_ERROR",
            StreamingErrorType::BufferOverflow => "BUFFER_OVERFLOW",
            StreamingErrorType::AbortError => "ABORT_ERROR",
            StreamingErrorType::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

/// 错误严重级别
///
/// 严重级别只决定日志级别，不单独决定可重试性——可重试性是
/// 每条分类规则显式设置的布尔值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// 获取严重级别的标识字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }
}

// ============================================================================
// StreamingError 值对象
// ============================================================================

/// 统一的流式传输错误对象
///
/// 构造后不再修改；每次失败都新建一个实例。`message` 面向日志，
/// `user_message` 面向终端用户、可直接展示；调用层只应向用户
/// 透出 `user_message`，绝不透出技术性的 `message`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingError {
    /// 错误类型
    pub error_type: StreamingErrorType,
    /// 严重级别
    pub severity: ErrorSeverity,
    /// 技术性错误消息（日志用）
    pub message: String,
    /// 面向用户的提示文案（法语）
    pub user_message: String,
    /// 是否可重试
    pub retryable: bool,
    /// 程序化分支用的错误码（如 `STREAM_002`）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// 错误发生时间
    pub timestamp: DateTime<Utc>,
    /// 附加上下文
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
}

impl StreamingError {
    /// 创建新的错误对象
    pub fn new(
        error_type: StreamingErrorType,
        severity: ErrorSeverity,
        message: impl Into<String>,
        user_message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            error_type,
            severity,
            message: message.into(),
            user_message: user_message.into(),
            retryable,
            code: None,
            timestamp: Utc::now(),
            context: None,
        }
    }

    /// 附加错误码
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// 附加上下文
    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = Some(context);
        self
    }

    /// 映射到调用层约定的 HTTP 状态码
    ///
    /// 超时 → 408，额度耗尽 → 402，网络 → 503，
    /// 认证级 API 错误 → 401，其余 → 500。
    pub fn http_status(&self) -> u16 {
        if self.code.as_deref() == Some(CREDITS_EXHAUSTED_CODE)
            || self.message.contains("credits exhausted")
        {
            return 402;
        }
        match self.error_type {
            StreamingErrorType::ConnectionTimeout => 408,
            StreamingErrorType::NetworkError => 503,
            StreamingErrorType::ApiError if self.severity == ErrorSeverity::Critical => 401,
            _ => 500,
        }
    }
}

impl fmt::Display for StreamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}/{}] {}", self.error_type.as_str(), code, self.message),
            None => write!(f, "[{}] {}", self.error_type.as_str(), self.message),
        }
    }
}

impl std::error::Error for StreamingError {}

// ============================================================================
// From trait 实现 - 用于错误转换
// ============================================================================

impl From<reqwest::Error> for StreamingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StreamingError::new(
                StreamingErrorType::ConnectionTimeout,
                ErrorSeverity::Medium,
                format!("request timeout: {}", err),
                USER_MSG_TIMEOUT,
                true,
            )
        } else if err.is_connect() {
            StreamingError::new(
                StreamingErrorType::NetworkError,
                ErrorSeverity::Medium,
                format!("connection failed: {}", err),
                USER_MSG_NETWORK,
                true,
            )
        } else {
            StreamingError::new(
                StreamingErrorType::NetworkError,
                ErrorSeverity::Medium,
                err.to_string(),
                USER_MSG_NETWORK,
                true,
            )
        }
    }
}

impl From<std::io::Error> for StreamingError {
    fn from(err: std::io::Error) -> Self {
        StreamingError::new(
            StreamingErrorType::NetworkError,
            ErrorSeverity::Medium,
            err.to_string(),
            USER_MSG_NETWORK,
            true,
        )
    }
}

impl From<serde_json::Error> for StreamingError {
    fn from(err: serde_json::Error) -> Self {
        StreamingError::new(
            StreamingErrorType::ParsingError,
            ErrorSeverity::Medium,
            err.to_string(),
            USER_MSG_PARSING,
            true,
        )
    }
}

// ============================================================================
// 分类规则
// ============================================================================

/// 按优先级对错误消息做子串匹配分类
///
/// 规则顺序：中止 > 超时 > 网络 > HTTP/状态 > 解析 > 缓冲区 > 未知。
/// 对枚举标记（如 `TIMEOUT`、`NETWORK`）大小写敏感。
pub fn classify_message(
    message: &str,
    context: Option<HashMap<String, String>>,
) -> StreamingError {
    let mut err = if message.contains("AbortError") || message.contains("aborted") {
        StreamingError::new(
            StreamingErrorType::AbortError,
            ErrorSeverity::Low,
            message,
            USER_MSG_ABORTED,
            false,
        )
    } else if message.contains("timeout") || message.contains("TIMEOUT") {
        StreamingError::new(
            StreamingErrorType::ConnectionTimeout,
            ErrorSeverity::Medium,
            message,
            USER_MSG_TIMEOUT,
            true,
        )
    } else if message.contains("fetch") || message.contains("network") || message.contains("NETWORK")
    {
        StreamingError::new(
            StreamingErrorType::NetworkError,
            ErrorSeverity::Medium,
            message,
            USER_MSG_NETWORK,
            true,
        )
    } else if message.contains("HTTP") || message.contains("status") {
        classify_api_message(message)
    } else if message.contains("JSON") || message.contains("parse") || message.contains("decode") {
        StreamingError::new(
            StreamingErrorType::ParsingError,
            ErrorSeverity::Medium,
            message,
            USER_MSG_PARSING,
            true,
        )
    } else if message.contains("buffer") || message.contains("memory") {
        StreamingError::new(
            StreamingErrorType::BufferOverflow,
            ErrorSeverity::High,
            message,
            USER_MSG_BUFFER,
            false,
        )
    } else {
        StreamingError::new(
            StreamingErrorType::UnknownError,
            ErrorSeverity::Medium,
            message,
            USER_MSG_UNKNOWN,
            true,
        )
    };

    if let Some(context) = context {
        err = err.with_context(context);
    }
    err
}

/// 根据消息中内嵌的 HTTP 状态码细分 API 错误
fn classify_api_message(message: &str) -> StreamingError {
    if message.contains("401") {
        StreamingError::new(
            StreamingErrorType::ApiError,
            ErrorSeverity::Critical,
            message,
            USER_MSG_SESSION_EXPIRED,
            false,
        )
    } else if message.contains("403") {
        StreamingError::new(
            StreamingErrorType::ApiError,
            ErrorSeverity::Critical,
            message,
            USER_MSG_ACCESS_DENIED,
            false,
        )
    } else if message.contains("429") {
        StreamingError::new(
            StreamingErrorType::ApiError,
            ErrorSeverity::Medium,
            message,
            USER_MSG_RATE_LIMITED,
            true,
        )
    } else if message.contains("500") {
        StreamingError::new(
            StreamingErrorType::ApiError,
            ErrorSeverity::High,
            message,
            USER_MSG_SERVER_ERROR,
            true,
        )
    } else if message.contains("502") || message.contains("503") {
        StreamingError::new(
            StreamingErrorType::ApiError,
            ErrorSeverity::High,
            message,
            USER_MSG_UNAVAILABLE,
            true,
        )
    } else if message.contains("400") || message.contains("404") || message.contains("422") {
        StreamingError::new(
            StreamingErrorType::ApiError,
            ErrorSeverity::Medium,
            message,
            USER_MSG_BAD_REQUEST,
            false,
        )
    } else {
        StreamingError::new(
            StreamingErrorType::ApiError,
            ErrorSeverity::Medium,
            message,
            USER_MSG_API_GENERIC,
            true,
        )
    }
}

// ============================================================================
// 错误处理器
// ============================================================================

/// 错误统计
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    /// 历史中的错误总数
    pub total: usize,
    /// 按类型分组的计数
    pub by_type: HashMap<String, usize>,
    /// 按严重级别分组的计数
    pub by_severity: HashMap<String, usize>,
    /// 可重试错误数量
    pub retryable_count: usize,
    /// 最近 5 条错误
    pub recent: Vec<StreamingError>,
}

/// 系统性问题检测结果
#[derive(Debug, Clone, Serialize)]
pub struct SystemIssueReport {
    /// 是否检测到系统性问题
    pub has_issues: bool,
    /// 问题列表
    pub issues: Vec<String>,
    /// 建议列表
    pub recommendations: Vec<String>,
}

/// 流式错误处理器
///
/// 持有一个有界错误历史（最多 50 条），对每个失败做分类、记录
/// 和按严重级别的日志输出。历史只用于诊断和聚合，不参与任何
/// 正确性决策。实例由应用的组装根显式构造并注入，不做模块级
/// 单例，便于测试时每个用例构造新实例。
#[derive(Debug, Default)]
pub struct StreamingErrorHandler {
    history: Mutex<VecDeque<StreamingError>>,
}

impl StreamingErrorHandler {
    /// 创建新的错误处理器
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(MAX_ERROR_HISTORY)),
        }
    }

    /// 分类并记录一个错误
    ///
    /// 分类结果会被追加到历史并按严重级别写日志。
    pub fn handle<E>(&self, error: &E, context: Option<HashMap<String, String>>) -> StreamingError
    where
        E: std::error::Error + ?Sized,
    {
        self.handle_message(&error.to_string(), context)
    }

    /// 分类并记录一条原始错误消息
    pub fn handle_message(
        &self,
        message: &str,
        context: Option<HashMap<String, String>>,
    ) -> StreamingError {
        let classified = classify_message(message, context);
        self.record(&classified);
        classified
    }

    /// 记录一个已经构造好的错误（如健康监控或额度门控产生的）
    pub fn record(&self, err: &StreamingError) {
        match err.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_type = err.error_type.as_str(),
                    severity = err.severity.as_str(),
                    retryable = err.retryable,
                    code = ?err.code,
                    message = %err.message,
                    "流式传输错误"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_type = err.error_type.as_str(),
                    retryable = err.retryable,
                    code = ?err.code,
                    message = %err.message,
                    "流式传输错误"
                );
            }
            ErrorSeverity::Low => {
                info!(
                    error_type = err.error_type.as_str(),
                    message = %err.message,
                    "流式传输错误"
                );
            }
        }

        let mut history = self.history.lock();
        history.push_back(err.clone());
        while history.len() > MAX_ERROR_HISTORY {
            history.pop_front();
        }
    }

    /// 历史中的错误数量
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// 清空错误历史
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// 对错误历史做纯聚合统计
    pub fn get_error_stats(&self) -> ErrorStats {
        let history = self.history.lock();

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut retryable_count = 0usize;

        for err in history.iter() {
            *by_type.entry(err.error_type.as_str().to_string()).or_insert(0) += 1;
            *by_severity
                .entry(err.severity.as_str().to_string())
                .or_insert(0) += 1;
            if err.retryable {
                retryable_count += 1;
            }
        }

        let recent: Vec<StreamingError> = history
            .iter()
            .rev()
            .take(RECENT_ERRORS_IN_STATS)
            .rev()
            .cloned()
            .collect();

        ErrorStats {
            total: history.len(),
            by_type,
            by_severity,
            retryable_count,
            recent,
        }
    }

    /// 检测系统性问题
    ///
    /// 检查最近 5 分钟内的错误：超过 10 条视为错误率过高，
    /// 超过 3 条超时视为超时反复出现，超过 5 条 API 错误视为
    /// 上游服务异常。给定历史与当前时间，结果是确定性的。
    pub fn detect_system_issues(&self) -> SystemIssueReport {
        let cutoff = Utc::now() - chrono::Duration::seconds(SYSTEM_ISSUE_WINDOW_SECS);
        let history = self.history.lock();
        let recent: Vec<&StreamingError> =
            history.iter().filter(|e| e.timestamp >= cutoff).collect();

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if recent.len() > 10 {
            issues.push(format!(
                "错误率过高：最近 5 分钟内发生 {} 次错误",
                recent.len()
            ));
            recommendations.push("检查上游 Agent 服务与网络状况".to_string());
        }

        let timeout_count = recent
            .iter()
            .filter(|e| e.error_type == StreamingErrorType::ConnectionTimeout)
            .count();
        if timeout_count > 3 {
            issues.push(format!(
                "超时反复出现：最近 5 分钟内 {} 次超时",
                timeout_count
            ));
            recommendations.push("增大静默超时阈值或检查 Agent 响应速度".to_string());
        }

        let api_error_count = recent
            .iter()
            .filter(|e| e.error_type == StreamingErrorType::ApiError)
            .count();
        if api_error_count > 5 {
            issues.push(format!(
                "API 错误频繁：最近 5 分钟内 {} 次 API 错误",
                api_error_count
            ));
            recommendations.push("检查凭证有效性与上游服务状态".to_string());
        }

        SystemIssueReport {
            has_issues: !issues.is_empty(),
            issues,
            recommendations,
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
