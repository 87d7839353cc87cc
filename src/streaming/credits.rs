//! 额度感知的流式门控
//!
//! 跟踪单个（用户，流式会话）的额度预算，随流推进被消耗。
//! 调用方在转发每个 chunk 前后咨询它，以便额度耗尽时立即停止
//! 转发并计费/告警。纯内存门控：不落库、不跨实例共享，已消耗
//! 额度的持久化由外部协作方负责。

use serde::Serialize;
use tracing::warn;

/// 默认的"接近耗尽"阈值（已用 / 初始 ≥ 0.8）
pub const DEFAULT_APPROACH_THRESHOLD: f64 = 0.8;

/// 单个流式会话的额度门控
///
/// 生命周期与流一致：流开始时创建，流结束时丢弃。同一实例的
/// 调用应来自同一个流处理任务。
#[derive(Debug, Clone, Serialize)]
pub struct CreditsAwareStream {
    user_id: String,
    /// 保留额度下限。当前不参与任何判定，仅存储备用。
    min_credits_reserve: u64,
    initial_credits: u64,
    credits_used: u64,
}

impl CreditsAwareStream {
    /// 创建新的额度门控
    ///
    /// `min_credits_reserve` 被接受并存储，但现阶段不影响任何
    /// 决策逻辑。
    pub fn new(user_id: impl Into<String>, min_credits_reserve: u64, initial_credits: u64) -> Self {
        Self {
            user_id: user_id.into(),
            min_credits_reserve,
            initial_credits,
            credits_used: 0,
        }
    }

    /// 用户 ID
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// 保留额度下限（存储但不参与判定）
    pub fn min_credits_reserve(&self) -> u64 {
        self.min_credits_reserve
    }

    /// 初始额度
    pub fn initial_credits(&self) -> u64 {
        self.initial_credits
    }

    /// 已消耗额度
    pub fn credits_used(&self) -> u64 {
        self.credits_used
    }

    /// 记录消耗额度
    ///
    /// 消耗只增不减。首次越过默认阈值时输出一次告警日志。
    pub fn record_credits_used(&mut self, amount: u64) {
        let was_approaching = self.is_approaching_limit();
        self.credits_used = self.credits_used.saturating_add(amount);

        if !was_approaching && self.is_approaching_limit() {
            warn!(
                user_id = %self.user_id,
                credits_used = self.credits_used,
                initial_credits = self.initial_credits,
                remaining = self.get_remaining_credits(),
                "流式额度即将耗尽"
            );
        }
    }

    /// 剩余额度（下限为 0）
    pub fn get_remaining_credits(&self) -> u64 {
        self.initial_credits.saturating_sub(self.credits_used)
    }

    /// 是否还允许继续流式传输
    pub fn can_continue_streaming(&self) -> bool {
        self.get_remaining_credits() > 0
    }

    /// 是否已接近额度上限（默认阈值 0.8）
    pub fn is_approaching_limit(&self) -> bool {
        self.is_approaching_limit_with(DEFAULT_APPROACH_THRESHOLD)
    }

    /// 按给定阈值判断是否接近额度上限
    pub fn is_approaching_limit_with(&self, threshold: f64) -> bool {
        if self.initial_credits == 0 {
            return true;
        }
        self.credits_used as f64 / self.initial_credits as f64 >= threshold
    }
}

// ============================================================================
// 测试模块
// ============================================================================
