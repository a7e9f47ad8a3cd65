use thiserror::Error;

/// 注册/消息失败原因的封闭分类
///
/// SIP 传输层的状态码在这里收敛为一个小的分类集合，
/// 未识别的状态码一律归入 `Generic`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    BadRequest,
    Unauthorized,
    Forbidden,
    PaymentRequired,
    NotFound,
    RequestTimeout,
    Conflict,
    /// 对端临时不可达（用户离线）
    TemporarilyUnavailable,
    NotAcceptable,
    ServerInternal,
    ServiceUnavailable,
    /// 本地传输错误（未收到任何响应）
    TransportError,
    /// 地址方案不受支持
    Unsupported,
    Generic,
}

impl FailureReason {
    /// 从原始 SIP 状态码分类
    pub fn from_code(code: u16) -> Self {
        match code {
            400 => FailureReason::BadRequest,
            401 | 407 => FailureReason::Unauthorized,
            402 => FailureReason::PaymentRequired,
            403 => FailureReason::Forbidden,
            404 => FailureReason::NotFound,
            408 => FailureReason::RequestTimeout,
            409 => FailureReason::Conflict,
            480 => FailureReason::TemporarilyUnavailable,
            406 | 488 => FailureReason::NotAcceptable,
            500 => FailureReason::ServerInternal,
            503 => FailureReason::ServiceUnavailable,
            _ => FailureReason::Generic,
        }
    }

    /// 用户可见的原因描述
    pub fn description(&self) -> &'static str {
        match self {
            FailureReason::BadRequest => "Bad request",
            FailureReason::Unauthorized => "Unauthorized",
            FailureReason::Forbidden => {
                "Forbidden, please check that username and password are correct"
            }
            FailureReason::PaymentRequired => "Payment required",
            FailureReason::NotFound => "Not found",
            FailureReason::RequestTimeout => "Timeout",
            FailureReason::Conflict => "Conflict",
            FailureReason::TemporarilyUnavailable => "Temporarily unavailable",
            FailureReason::NotAcceptable => "Not acceptable",
            FailureReason::ServerInternal => "Internal server error",
            FailureReason::ServiceUnavailable => "Service unavailable",
            FailureReason::TransportError => "Transport error",
            FailureReason::Unsupported => "Unsupported address scheme",
            FailureReason::Generic => "Failed",
        }
    }

    /// 标准错误代码，用于日志分析和监控
    pub fn error_code(&self) -> &'static str {
        match self {
            FailureReason::BadRequest => "BAD_REQUEST",
            FailureReason::Unauthorized => "UNAUTHORIZED",
            FailureReason::Forbidden => "FORBIDDEN",
            FailureReason::PaymentRequired => "PAYMENT_REQUIRED",
            FailureReason::NotFound => "NOT_FOUND",
            FailureReason::RequestTimeout => "REQUEST_TIMEOUT",
            FailureReason::Conflict => "CONFLICT",
            FailureReason::TemporarilyUnavailable => "TEMPORARILY_UNAVAILABLE",
            FailureReason::NotAcceptable => "NOT_ACCEPTABLE",
            FailureReason::ServerInternal => "SERVER_INTERNAL_ERROR",
            FailureReason::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            FailureReason::TransportError => "TRANSPORT_ERROR",
            FailureReason::Unsupported => "UNSUPPORTED_SCHEME",
            FailureReason::Generic => "GENERIC_FAILURE",
        }
    }

    /// 判断失败是否可恢复（可用于重试逻辑）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FailureReason::RequestTimeout
                | FailureReason::TemporarilyUnavailable
                | FailureReason::ServerInternal
                | FailureReason::ServiceUnavailable
                | FailureReason::TransportError
        )
    }
}

impl From<&rsip::StatusCode> for FailureReason {
    fn from(status: &rsip::StatusCode) -> Self {
        match status {
            rsip::StatusCode::BadRequest => FailureReason::BadRequest,
            rsip::StatusCode::Unauthorized | rsip::StatusCode::ProxyAuthenticationRequired => {
                FailureReason::Unauthorized
            }
            rsip::StatusCode::PaymentRequired => FailureReason::PaymentRequired,
            rsip::StatusCode::Forbidden => FailureReason::Forbidden,
            rsip::StatusCode::NotFound => FailureReason::NotFound,
            rsip::StatusCode::RequestTimeout => FailureReason::RequestTimeout,
            rsip::StatusCode::TemporarilyUnavailable => FailureReason::TemporarilyUnavailable,
            rsip::StatusCode::NotAcceptable => FailureReason::NotAcceptable,
            rsip::StatusCode::ServerInternalError => FailureReason::ServerInternal,
            rsip::StatusCode::ServiceUnavailable => FailureReason::ServiceUnavailable,
            _ => FailureReason::Generic,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// 呼出/传信操作的 Result 类型别名
pub type DialResult<T> = Result<T, DialError>;

/// 呼出相关错误类型
#[derive(Error, Debug)]
pub enum DialError {
    /// 地址方案不受支持，不会到达传输层
    #[error("unsupported address: {target}, supported schemes are sip:, h323: and callto:")]
    Unsupported { target: String },

    /// 传输层拒绝发起请求
    #[error("transport refused to start the attempt: {0}")]
    Transport(#[from] TransportError),

    /// 本地已有呼叫在进行中
    #[error("a call is already in progress")]
    CallInProgress,

    /// 没有可转接的活动呼叫
    #[error("no active call to transfer")]
    NoActiveCall,

    /// 消息体为空
    #[error("refusing to send an empty message")]
    EmptyMessage,

    /// 目标地址为空
    #[error("refusing to dial an empty target")]
    EmptyTarget,
}

impl DialError {
    pub fn unsupported(target: impl Into<String>) -> Self {
        DialError::Unsupported {
            target: target.into(),
        }
    }

    /// 获取标准错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            DialError::Unsupported { .. } => "UNSUPPORTED_TARGET",
            DialError::Transport(_) => "TRANSPORT_ERROR",
            DialError::CallInProgress => "CALL_IN_PROGRESS",
            DialError::NoActiveCall => "NO_ACTIVE_CALL",
            DialError::EmptyMessage => "EMPTY_MESSAGE",
            DialError::EmptyTarget => "EMPTY_TARGET",
        }
    }
}

/// 传输端口返回的错误
///
/// 传输实现只负责报告请求是否成功提交，
/// 结果总是通过事件回调送回
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("transport rejected the request: {0}")]
    Rejected(String),

    #[error("transport is shut down")]
    ShutDown,
}

/// 账户配置相关错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("account name must not be empty")]
    EmptyName,

    #[error("username must not be empty")]
    EmptyUsername,

    #[error("field '{0}' must not contain the '|' separator")]
    IllegalSeparator(&'static str),

    #[error("unknown account: {0}")]
    UnknownAccount(uuid::Uuid),

    #[error("unrecognized protocol")]
    UnknownProtocol,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_classification() {
        assert_eq!(FailureReason::from_code(401), FailureReason::Unauthorized);
        assert_eq!(FailureReason::from_code(407), FailureReason::Unauthorized);
        assert_eq!(
            FailureReason::from_code(480),
            FailureReason::TemporarilyUnavailable
        );
        // 未映射的状态码收敛为 Generic
        assert_eq!(FailureReason::from_code(487), FailureReason::Generic);
        assert_eq!(FailureReason::from_code(699), FailureReason::Generic);
    }

    #[test]
    fn test_typed_status_classification() {
        assert_eq!(
            FailureReason::from(&rsip::StatusCode::Forbidden),
            FailureReason::Forbidden
        );
        assert_eq!(
            FailureReason::from(&rsip::StatusCode::Ringing),
            FailureReason::Generic
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(FailureReason::RequestTimeout.is_recoverable());
        assert!(!FailureReason::Forbidden.is_recoverable());
    }
}
