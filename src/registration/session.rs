/// 单账户注册会话
///
/// 把一个账户的注册生命周期收敛为六个状态，
/// 同一账户同一时刻最多一个在途尝试
use std::time::Duration;

use crate::account::Account;
use crate::error::FailureReason;
use crate::transport::{RegisterRequest, RetryPolicy};

/// MWI 订阅周期
pub const MWI_INTERVAL: Duration = Duration::from_secs(3600);

/// 注册状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Unregistering,
    RegistrationFailed,
    UnregistrationFailed,
}

impl RegistrationState {
    /// 是否处于在途状态
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            RegistrationState::Registering | RegistrationState::Unregistering
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "Unregistered",
            RegistrationState::Registering => "Processing...",
            RegistrationState::Registered => "Registered",
            RegistrationState::Unregistering => "Processing...",
            RegistrationState::RegistrationFailed => "Could not register",
            RegistrationState::UnregistrationFailed => "Could not unregister",
        }
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// 一次对外可见的状态变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationUpdate {
    pub aor: String,
    pub state: RegistrationState,
    pub failure: Option<FailureReason>,
}

/// 每账户注册状态机
///
/// 只做状态流转，不做 IO；请求的提交和事件的接收由端点层负责
#[derive(Debug)]
pub struct RegistrationSession {
    aor: String,
    state: RegistrationState,
    last_failure: Option<FailureReason>,
    /// 在途尝试标记，同一账户的请求串行化
    in_flight: bool,
    /// MWI 订阅只在首次注册成功后发起一次
    mwi_subscribed: bool,
    /// 上次看到的留言摘要，只有变化才上报
    mwi_summary: Option<String>,
}

impl RegistrationSession {
    pub fn new(account: &Account) -> Self {
        Self {
            aor: account.aor(),
            state: RegistrationState::Unregistered,
            last_failure: None,
            in_flight: false,
            mwi_subscribed: false,
            mwi_summary: None,
        }
    }

    pub fn aor(&self) -> &str {
        &self.aor
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.last_failure
    }

    /// 为账户构造下一次注册请求
    ///
    /// 启用账户按配置过期时间注册，停用账户以 expires = 0 注销。
    /// 已有在途尝试时返回 `None`，调用方应等待其结果
    pub fn start(&mut self, account: &Account) -> Option<RegisterRequest> {
        if self.in_flight {
            return None;
        }

        let expires = if account.enabled {
            account.effective_timeout()
        } else {
            0
        };

        self.in_flight = true;
        self.state = if expires > 0 {
            RegistrationState::Registering
        } else {
            RegistrationState::Unregistering
        };

        Some(RegisterRequest {
            aor: self.aor.clone(),
            registrar: account.host.clone(),
            auth_username: account.effective_auth_username(),
            password: account.password.clone(),
            expires,
            retry: RetryPolicy::default(),
        })
    }

    /// 请求在本地提交阶段就失败了（没有任何响应）
    pub fn fail_submission(&mut self) -> RegistrationUpdate {
        let was_registering = self.state != RegistrationState::Unregistering;
        self.in_flight = false;
        self.state = if was_registering {
            RegistrationState::RegistrationFailed
        } else {
            RegistrationState::UnregistrationFailed
        };
        self.last_failure = Some(FailureReason::Generic);
        self.update()
    }

    /// 收到传输层的最终结果
    ///
    /// `code = None` 表示成功；487（请求被终止）是主动撤销的回声，
    /// 不算失败，静默吞掉并返回 `None`
    pub fn apply_outcome(
        &mut self,
        was_registering: bool,
        code: Option<u16>,
    ) -> Option<RegistrationUpdate> {
        self.in_flight = false;

        match code {
            None => {
                self.state = if was_registering {
                    RegistrationState::Registered
                } else {
                    RegistrationState::Unregistered
                };
                self.last_failure = None;
                Some(self.update())
            }
            Some(487) => None,
            Some(code) => {
                self.state = if was_registering {
                    RegistrationState::RegistrationFailed
                } else {
                    RegistrationState::UnregistrationFailed
                };
                self.last_failure = Some(FailureReason::from_code(code));
                Some(self.update())
            }
        }
    }

    /// 注册成功后是否需要发起 MWI 订阅（检查并置位，只返回一次 true）
    pub fn take_mwi_subscription(&mut self) -> bool {
        if self.state == RegistrationState::Registered && !self.mwi_subscribed {
            self.mwi_subscribed = true;
            true
        } else {
            false
        }
    }

    /// 收到 MWI 通知，返回规整后的摘要（仅在变化时）
    ///
    /// 摘要统一转小写，"no" 规整为 "0/0"
    pub fn update_mwi(&mut self, raw: &str) -> Option<String> {
        let mut summary = raw.trim().to_lowercase();
        if summary == "no" {
            summary = "0/0".to_string();
        }

        if self.mwi_summary.as_deref() == Some(summary.as_str()) {
            return None;
        }
        self.mwi_summary = Some(summary.clone());
        Some(summary)
    }

    fn update(&self) -> RegistrationUpdate {
        RegistrationUpdate {
            aor: self.aor.clone(),
            state: self.state,
            failure: self.last_failure,
        }
    }
}
