//! 进程级健康聚合
//!
//! 汇总所有流的顶层健康检查结果（通过/失败 + 耗时），用滚动
//! 窗口检测系统性退化。实例由组装根显式构造、以 `Arc` 注入到
//! 需要上报的地方，不做模块级单例。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

/// 样本环形缓冲的最大长度
const MAX_HEALTH_SAMPLES: usize = 100;

/// 健康状态计算所用的窗口大小（最近 N 个样本）
const HEALTH_WINDOW: usize = 20;

/// 判定健康所需的最低成功率（百分比）
const HEALTHY_SUCCESS_RATE: f64 = 80.0;

/// 单次健康检查样本
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckSample {
    /// 记录时间
    pub timestamp: DateTime<Utc>,
    /// 是否成功
    pub success: bool,
    /// 本次流式尝试的耗时（毫秒）
    pub duration_ms: u64,
}

/// 聚合后的健康状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatusSummary {
    /// 是否健康（窗口内成功率 ≥ 80%）
    pub healthy: bool,
    /// 窗口内成功率（百分比）
    pub success_rate: f64,
    /// 窗口内平均耗时（毫秒）
    pub average_duration_ms: f64,
    /// 窗口内失败次数
    pub recent_failures: u32,
}

/// 进程级健康聚合器
///
/// 多个并发流共享同一实例，内部用互斥锁保护有界缓冲的写入。
#[derive(Debug, Default)]
pub struct GlobalHealthAggregator {
    samples: Mutex<VecDeque<HealthCheckSample>>,
}

impl GlobalHealthAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(MAX_HEALTH_SAMPLES)),
        }
    }

    /// 记录一次顶层流式尝试的结果
    pub fn record_health_check(&self, success: bool, duration_ms: u64) {
        debug!(success, duration_ms, "记录健康检查样本");

        let mut samples = self.samples.lock();
        samples.push_back(HealthCheckSample {
            timestamp: Utc::now(),
            success,
            duration_ms,
        });
        while samples.len() > MAX_HEALTH_SAMPLES {
            samples.pop_front();
        }
    }

    /// 当前样本数量
    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    /// 基于最近 20 个样本计算健康状态
    ///
    /// 没有任何样本时乐观地报告健康（100% 成功率、零耗时、
    /// 零失败），而不是错误状态。
    pub fn get_health_status(&self) -> HealthStatusSummary {
        let samples = self.samples.lock();

        if samples.is_empty() {
            return HealthStatusSummary {
                healthy: true,
                success_rate: 100.0,
                average_duration_ms: 0.0,
                recent_failures: 0,
            };
        }

        let window: Vec<&HealthCheckSample> = samples.iter().rev().take(HEALTH_WINDOW).collect();
        let total = window.len() as f64;
        let successes = window.iter().filter(|s| s.success).count();
        let failures = window.len() - successes;
        let duration_sum: u64 = window.iter().map(|s| s.duration_ms).sum();

        let success_rate = successes as f64 / total * 100.0;

        HealthStatusSummary {
            healthy: success_rate >= HEALTHY_SUCCESS_RATE,
            success_rate,
            average_duration_ms: duration_sum as f64 / total,
            recent_failures: failures as u32,
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
