/// 传输端口模块
///
/// SIP 线协议（报文解析、事务重传）由外部传输栈承担，
/// 本 crate 只通过这里的窄接口与之交互：
///
/// - 出站动词：注册、发起会话、应答/转移/清除、发消息、订阅
/// - 入站事件：`TransportEvent`，由驱动方送入 `SipEndpoint::handle_event`
///
/// 所有动词都是异步提交，结果总是通过事件送回，不做阻塞等待
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;

/// 呼叫令牌（对传输层不透明）
pub type CallToken = String;

/// 注册请求的重试/超时参数，原样传给传输栈
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_retry: Duration,
    pub max_retry: Duration,
    pub max_retries: u32,
    pub ack_timeout: Duration,
    pub non_invite_timeout: Duration,
    pub pdu_cleanup_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_retry: Duration::from_millis(500),
            max_retry: Duration::from_millis(4000),
            max_retries: 8,
            ack_timeout: Duration::from_secs(32),
            non_invite_timeout: Duration::from_secs(6),
            pdu_cleanup_timeout: Duration::from_secs(1),
        }
    }
}

/// 一次 REGISTER / UNREGISTER 请求
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    /// 地址记录
    pub aor: String,

    /// 注册服务器（host，不含端口）
    pub registrar: String,

    /// 认证用户名
    pub auth_username: String,

    /// 密码
    pub password: String,

    /// 过期时间（秒），0 表示按过期注销
    pub expires: u32,

    /// 重试参数
    pub retry: RetryPolicy,
}

/// 订阅类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// 留言指示 (MWI)
    MessageSummary,
}

/// 清除呼叫的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    NoAnswer,
    LocalBusy,
    Declined,
}

/// 传输栈送入端点的事件
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// 注册/注销成功
    RegistrationSucceeded { aor: String, was_registering: bool },

    /// 注册/注销失败，携带原始状态码
    RegistrationFailed {
        aor: String,
        was_registering: bool,
        code: u16,
    },

    /// 入站会话发起
    IncomingSession {
        token: CallToken,
        /// 传输层连接标识，用于识别重复通知
        connection_id: String,
        display_name: String,
        remote: String,
        /// 原始 Alert-Info 头（若有）
        alert_info: Option<String>,
    },

    /// 会话接通
    SessionEstablished { token: CallToken },

    /// 会话释放
    SessionReleased { token: CallToken },

    /// 入站即时消息
    IncomingMessage {
        from: String,
        display_name: String,
        dialog_id: String,
        body: String,
    },

    /// MESSAGE 发送完成（含失败）
    MessageOutcome {
        destination: String,
        display_name: String,
        code: u16,
    },

    /// 留言指示通知
    MwiNotification { aor: String, summary: String },
}

/// 传输端口能力接口
///
/// 实现方负责真正的 SIP 线协议；这里的每个动词只表示"请求已提交"
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// 发起注册（expires = 0 表示注销）
    async fn start_registration(&self, request: RegisterRequest) -> Result<(), TransportError>;

    /// 发起出站会话
    async fn start_session(
        &self,
        destination: String,
        token: CallToken,
    ) -> Result<(), TransportError>;

    /// 应答入站会话
    async fn answer(&self, token: &str) -> Result<(), TransportError>;

    /// 把入站会话转移到目标
    async fn forward(&self, token: &str, target: String) -> Result<(), TransportError>;

    /// 把已接通会话转接到目标
    async fn transfer(&self, token: &str, target: String) -> Result<(), TransportError>;

    /// 清除会话
    async fn clear(&self, token: &str, reason: ClearReason) -> Result<(), TransportError>;

    /// 发送即时消息
    async fn send_message(
        &self,
        destination: String,
        content_type: String,
        body: String,
    ) -> Result<(), TransportError>;

    /// 订阅事件包
    async fn subscribe(
        &self,
        kind: SubscriptionKind,
        aor: String,
        interval: Duration,
    ) -> Result<(), TransportError>;
}

/// 记录型传输桩
///
/// 把提交的动词按顺序记录下来，供测试断言和 CLI 演示使用
#[derive(Default)]
pub struct RecordingTransport {
    actions: Mutex<Vec<RecordedAction>>,
}

/// 一条被记录的出站动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedAction {
    Register {
        aor: String,
        registrar: String,
        expires: u32,
    },
    StartSession {
        destination: String,
        token: CallToken,
    },
    Answer {
        token: CallToken,
    },
    Forward {
        token: CallToken,
        target: String,
    },
    Transfer {
        token: CallToken,
        target: String,
    },
    Clear {
        token: CallToken,
        reason: ClearReason,
    },
    SendMessage {
        destination: String,
        content_type: String,
        body: String,
    },
    Subscribe {
        kind: SubscriptionKind,
        aor: String,
        interval_secs: u64,
    },
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, action: RecordedAction) {
        debug!("传输动作: {:?}", action);
        self.actions.lock().unwrap().push(action);
    }

    /// 取出已记录的动作序列
    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportPort for RecordingTransport {
    async fn start_registration(&self, request: RegisterRequest) -> Result<(), TransportError> {
        self.record(RecordedAction::Register {
            aor: request.aor,
            registrar: request.registrar,
            expires: request.expires,
        });
        Ok(())
    }

    async fn start_session(
        &self,
        destination: String,
        token: CallToken,
    ) -> Result<(), TransportError> {
        self.record(RecordedAction::StartSession { destination, token });
        Ok(())
    }

    async fn answer(&self, token: &str) -> Result<(), TransportError> {
        self.record(RecordedAction::Answer {
            token: token.to_string(),
        });
        Ok(())
    }

    async fn forward(&self, token: &str, target: String) -> Result<(), TransportError> {
        self.record(RecordedAction::Forward {
            token: token.to_string(),
            target,
        });
        Ok(())
    }

    async fn transfer(&self, token: &str, target: String) -> Result<(), TransportError> {
        self.record(RecordedAction::Transfer {
            token: token.to_string(),
            target,
        });
        Ok(())
    }

    async fn clear(&self, token: &str, reason: ClearReason) -> Result<(), TransportError> {
        self.record(RecordedAction::Clear {
            token: token.to_string(),
            reason,
        });
        Ok(())
    }

    async fn send_message(
        &self,
        destination: String,
        content_type: String,
        body: String,
    ) -> Result<(), TransportError> {
        self.record(RecordedAction::SendMessage {
            destination,
            content_type,
            body,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        kind: SubscriptionKind,
        aor: String,
        interval: Duration,
    ) -> Result<(), TransportError> {
        self.record(RecordedAction::Subscribe {
            kind,
            aor,
            interval_secs: interval.as_secs(),
        });
        Ok(())
    }
}
