//! 固定间隔重试

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::WencaiError;

/// 重试配置：最多尝试 `attempts` 次，每两次之间固定等待 `delay`
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::ZERO,
        }
    }
}

/// 反复执行 `op` 直到成功、遇到不可重试的错误或次数耗尽
///
/// 每次尝试前以及等待期间都会检查取消信号。次数耗尽时返回最后一次的错误。
pub async fn while_do<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, WencaiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, WencaiError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if attempt > 1 && !policy.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(WencaiError::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(WencaiError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                log::warn!("{} 第{}次尝试失败: {}", label, attempt, e);
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| WencaiError::Transport(format!("{} 没有执行任何尝试", label))))
}
