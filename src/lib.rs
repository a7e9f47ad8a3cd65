// 声明所有模块
pub mod account;
pub mod address;
pub mod admission;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod messaging;
pub mod registration;
pub mod transport;
pub mod utils;

/// 重新导出thiserror错误类型
pub use crate::error::{DialError, DialResult, FailureReason, RegistryError, TransportError};

/// 主要API重新导出，简化使用
pub use crate::account::{Account, AccountRegistry, Protocol};
pub use crate::address::{Address, AddressResolver, AddressScheme, DialPlan};
pub use crate::admission::{CallAdmissionPolicy, CallingState, Disposition};
pub use crate::config::{EndpointConfig, ForwardingConfig, Presence};
pub use crate::endpoint::{EndpointEvent, SipEndpoint};
pub use crate::messaging::MessageDeduplicator;
pub use crate::registration::{RegistrationSession, RegistrationState};
pub use crate::transport::{TransportEvent, TransportPort};

/// 库的版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 便捷函数：用单个账户快速搭起端点
pub fn create_endpoint(
    account: Account,
    config: EndpointConfig,
    transport: std::sync::Arc<dyn TransportPort>,
) -> Result<
    (
        SipEndpoint,
        tokio::sync::mpsc::UnboundedReceiver<EndpointEvent>,
    ),
    RegistryError,
> {
    let registry = AccountRegistry::new();
    registry.add(account)?;
    Ok(SipEndpoint::new(registry, config, transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use std::sync::Arc;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[tokio::test]
    async fn test_create_endpoint() {
        let account = Account::new("Ekiga.net", Protocol::Sip, "ekiga.net", "alice", "secret")
            .with_enabled(true);
        let transport = Arc::new(RecordingTransport::new());

        let (endpoint, _events) =
            create_endpoint(account, EndpointConfig::default(), transport).unwrap();

        // 首个账户自动成为默认账户
        let plan = endpoint.dial_plan();
        assert_eq!(plan.default_sip_host.as_deref(), Some("ekiga.net"));
    }
}
