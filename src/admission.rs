/// 来电准入模块
///
/// 入站会话的处置由一条严格有序的规则链决定：
///
/// 1. 重复通知（同一连接再次上报）：静默接受，不打扰用户
/// 2. 勿扰：直接拒绝
/// 3. 无条件转移：转移到配置目标
/// 4. 本地忙：有忙时转移目标则转移，否则拒绝
/// 5. 随时可聊 / Alert-Info 自动应答闩锁：自动应答
/// 6. 其余情况：交给用户决定，并武装无应答定时器
///
/// 决策本身是纯函数，定时器用 `CancellationToken` 做可取消的一次性任务
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{EndpointConfig, Presence};
use crate::transport::CallToken;

/// 无应答超时的硬上限
pub const MAX_NO_ANSWER_TIMEOUT: u32 = 60;

/// Alert-Info 中触发自动应答的标记
const RING_ANSWER_MARKER: &str = "Ring Answer";

/// 本地呼叫状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingState {
    /// 空闲
    Standby,
    /// 呼出等待应答
    Calling,
    /// 来电等待处置
    Called,
    /// 通话中
    Connected,
}

/// 来电处置决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// 静默接受（重复通知）
    AcceptSilently,
    /// 拒绝
    Reject,
    /// 转移到目标
    Forward(String),
    /// 自动应答
    AutoAnswer,
    /// 交给用户，超时后按无应答处理；`deadline` 为 0 时不装定时器
    AskUser { deadline: Duration },
}

/// 正在等待处置的来电
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub token: CallToken,
    pub connection_id: String,
    pub display_name: String,
    pub remote: String,
}

/// 来电准入策略
#[derive(Default)]
pub struct CallAdmissionPolicy {
    /// 一次性自动应答闩锁，消费后自动清除
    auto_answer_next: AtomicBool,
}

impl CallAdmissionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// 闩住下一通来电自动应答
    pub fn latch_auto_answer(&self) {
        self.auto_answer_next.store(true, Ordering::SeqCst);
    }

    /// 从 Alert-Info 头识别自动应答标记
    pub fn note_alert_info(&self, header: &str) {
        if header.contains(RING_ANSWER_MARKER) {
            debug!("Alert-Info 指示自动应答");
            self.latch_auto_answer();
        }
    }

    /// 对一通来电做出处置决定
    pub fn decide(
        &self,
        state: CallingState,
        is_duplicate: bool,
        config: &EndpointConfig,
    ) -> Disposition {
        if is_duplicate {
            return Disposition::AcceptSilently;
        }

        if config.presence == Presence::DoNotDisturb {
            return Disposition::Reject;
        }

        if let Some(target) = non_empty(&config.forwarding.always_forward) {
            return Disposition::Forward(target);
        }

        if state != CallingState::Standby {
            return match non_empty(&config.forwarding.forward_on_busy) {
                Some(target) => Disposition::Forward(target),
                None => Disposition::Reject,
            };
        }

        if self.auto_answer_next.swap(false, Ordering::SeqCst)
            || config.presence == Presence::FreeForChat
        {
            return Disposition::AutoAnswer;
        }

        let deadline = config
            .forwarding
            .no_answer_timeout
            .min(MAX_NO_ANSWER_TIMEOUT);
        Disposition::AskUser {
            deadline: Duration::from_secs(deadline.into()),
        }
    }
}

fn non_empty(target: &Option<String>) -> Option<String> {
    target.as_deref().filter(|t| !t.is_empty()).map(String::from)
}

/// 可取消的无应答定时器
///
/// 重新武装会先取消上一个任务，同一时刻最多一个在途
#[derive(Default)]
pub struct NoAnswerTimer {
    current: Mutex<Option<CancellationToken>>,
}

impl NoAnswerTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 武装定时器；`deadline` 为 0 时只取消旧任务，不装新任务
    pub fn arm<F, Fut>(&self, deadline: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        {
            let mut guard = self.current.lock().unwrap();
            if let Some(old) = guard.take() {
                old.cancel();
            }
            if deadline.is_zero() {
                return;
            }
            *guard = Some(token.clone());
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("无应答定时器已取消");
                }
                _ = tokio::time::sleep(deadline) => {
                    on_fire().await;
                }
            }
        });
    }

    /// 解除定时器
    pub fn disarm(&self) {
        if let Some(token) = self.current.lock().unwrap().take() {
            token.cancel();
        }
    }
}
