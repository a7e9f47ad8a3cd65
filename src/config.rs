/// 全局配置模块
///
/// 端点消费的只读配置快照。配置的持久化存储（键值库）是外部协作者，
/// 这里只定义端点读取的字段，由驱动方在构造时注入
use uuid::Uuid;

/// 本地在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Away,
    /// 勿扰：一切来电直接拒绝
    DoNotDisturb,
    /// 随时可聊：来电自动应答
    FreeForChat,
    Offline,
    Invisible,
}

/// 呼叫转移配置
#[derive(Debug, Clone, Default)]
pub struct ForwardingConfig {
    /// 无条件转移目标
    pub always_forward: Option<String>,

    /// 忙时转移目标
    pub forward_on_busy: Option<String>,

    /// 无应答转移目标
    pub forward_on_no_answer: Option<String>,

    /// 无应答超时（秒），上限 60
    pub no_answer_timeout: u32,
}

/// 端点全局配置
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// 本地在线状态
    pub presence: Presence,

    /// 转移配置
    pub forwarding: ForwardingConfig,

    /// 默认 H.323 网关
    pub h323_gateway: Option<String>,

    /// PC-To-Phone 前缀（拨号以此开头时走电话网关）
    pub pstn_prefix: String,

    /// 担任"默认网关"角色的账户
    ///
    /// 只有该账户启用且为默认时，PSTN 改写规则才生效
    pub default_gateway_account: Option<Uuid>,

    /// 担任"电话网关"角色的账户（改写目标域取自其 host）
    pub phone_gateway_account: Option<Uuid>,

    /// 消息去重表容量，None 表示不限（参考行为）
    pub dedup_capacity: Option<usize>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            presence: Presence::Online,
            forwarding: ForwardingConfig::default(),
            h323_gateway: None,
            pstn_prefix: "00".to_string(),
            default_gateway_account: None,
            phone_gateway_account: None,
            dedup_capacity: None,
        }
    }
}

impl EndpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置在线状态
    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = presence;
        self
    }

    /// 设置转移配置
    pub fn with_forwarding(mut self, forwarding: ForwardingConfig) -> Self {
        self.forwarding = forwarding;
        self
    }

    /// 设置默认 H.323 网关
    pub fn with_h323_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.h323_gateway = Some(gateway.into());
        self
    }

    /// 指定网关角色账户
    pub fn with_gateway_roles(mut self, default_gateway: Uuid, phone_gateway: Uuid) -> Self {
        self.default_gateway_account = Some(default_gateway);
        self.phone_gateway_account = Some(phone_gateway);
        self
    }

    /// 设置去重表容量上限
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = Some(capacity);
        self
    }
}
