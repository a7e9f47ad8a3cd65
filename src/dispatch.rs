/// 出站调度模块
///
/// 把"呼叫 / 转接 / 发消息"的用户意图翻译成传输动词。
/// 调度器本身无状态，呼叫状态由端点层持有并作为参数传入；
/// 所有最终结果仍通过传输事件回流
use std::sync::Arc;

use tracing::{info, warn};

use crate::address::{Address, AddressScheme};
use crate::admission::CallingState;
use crate::error::{DialError, DialResult, FailureReason};
use crate::transport::{CallToken, TransportPort};
use crate::utils;

/// 即时消息的内容类型
pub const MESSAGE_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

pub struct OutboundDispatcher {
    transport: Arc<dyn TransportPort>,
}

impl OutboundDispatcher {
    pub fn new(transport: Arc<dyn TransportPort>) -> Self {
        Self { transport }
    }

    /// 发起呼出
    ///
    /// 只接受 SIP 地址（裸地址已在解析时归入 SIP）和快捷号；
    /// 空目标直接拒绝，空闲以外的状态拒绝二次呼出
    pub async fn place_call(
        &self,
        state: CallingState,
        destination: &Address,
    ) -> DialResult<CallToken> {
        if destination.is_empty() {
            return Err(DialError::EmptyTarget);
        }
        if state != CallingState::Standby {
            return Err(DialError::CallInProgress);
        }
        if !matches!(
            destination.scheme(),
            AddressScheme::Sip | AddressScheme::Shortcut
        ) {
            return Err(DialError::unsupported(destination.full_address(false)));
        }

        let token = utils::new_call_token();
        info!("发起呼叫: {} (token: {})", destination, token);
        self.transport
            .start_session(destination.full_address(false), token.clone())
            .await?;
        Ok(token)
    }

    /// 处置当前呼叫：应答、转移或转接
    ///
    /// - 来电振铃中给了目标：尚未接通，走转移
    /// - 已接通给了目标：走转接
    /// - 来电振铃中没给目标：应答
    pub async fn transfer(
        &self,
        state: CallingState,
        token: &str,
        target: Option<&Address>,
    ) -> DialResult<()> {
        if target.is_some_and(|t| t.is_empty()) {
            return Err(DialError::EmptyTarget);
        }
        match (state, target) {
            (CallingState::Called, Some(target)) => {
                info!("来电转移到 {}", target);
                self.transport
                    .forward(token, target.full_address(false))
                    .await?;
            }
            (_, Some(target)) => {
                info!("通话转接到 {}", target);
                self.transport
                    .transfer(token, target.full_address(false))
                    .await?;
            }
            (CallingState::Called, None) => {
                info!("应答来电 (token: {})", token);
                self.transport.answer(token).await?;
            }
            (_, None) => return Err(DialError::NoActiveCall),
        }
        Ok(())
    }

    /// 发送即时消息
    pub async fn send_instant_message(
        &self,
        destination: &Address,
        body: &str,
    ) -> DialResult<()> {
        if destination.is_empty() {
            return Err(DialError::EmptyTarget);
        }
        if body.is_empty() {
            return Err(DialError::EmptyMessage);
        }
        if destination.scheme() != AddressScheme::Sip {
            return Err(DialError::unsupported(destination.full_address(false)));
        }

        self.transport
            .send_message(
                destination.full_address(false),
                MESSAGE_CONTENT_TYPE.to_string(),
                body.to_string(),
            )
            .await?;
        Ok(())
    }
}

/// MESSAGE 完成状态码转用户提示
///
/// 成功 (200) 和超时 (408) 不打扰用户；480 明确提示对端离线；
/// 其余失败给出分类描述
pub fn message_outcome_notice(code: u16) -> Option<String> {
    match code {
        200 | 408 => None,
        480 => Some("Could not send message: user offline".to_string()),
        code => {
            let reason = FailureReason::from_code(code);
            warn!(
                "消息发送失败: code={} reason={}",
                code,
                reason.error_code()
            );
            Some(format!("Could not send message: {}", reason.description()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressResolver, DialPlan};
    use crate::transport::{RecordedAction, RecordingTransport};

    fn resolver() -> AddressResolver {
        AddressResolver::new(DialPlan {
            default_sip_host: Some("ekiga.net".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_place_call_submits_session() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let address = resolver().resolve("sip:bob@ekiga.net").unwrap();
        let token = dispatcher
            .place_call(CallingState::Standby, &address)
            .await
            .unwrap();

        assert_eq!(
            transport.actions(),
            vec![RecordedAction::StartSession {
                destination: "sip:bob@ekiga.net".to_string(),
                token,
            }]
        );
    }

    #[tokio::test]
    async fn test_place_call_rejects_when_busy() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let address = resolver().resolve("sip:bob@ekiga.net").unwrap();
        let result = dispatcher.place_call(CallingState::Connected, &address).await;

        assert!(matches!(result, Err(DialError::CallInProgress)));
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_place_call_rejects_h323() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let address = resolver().resolve("h323:bob@gw.example.com").unwrap();
        let result = dispatcher.place_call(CallingState::Standby, &address).await;

        assert!(matches!(result, Err(DialError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_transfer_answers_ringing_call_without_target() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        dispatcher
            .transfer(CallingState::Called, "tok-1", None)
            .await
            .unwrap();

        assert_eq!(
            transport.actions(),
            vec![RecordedAction::Answer {
                token: "tok-1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_transfer_forwards_ringing_call_with_target() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let target = resolver().resolve("sip:voicemail@ekiga.net").unwrap();
        dispatcher
            .transfer(CallingState::Called, "tok-1", Some(&target))
            .await
            .unwrap();

        assert_eq!(
            transport.actions(),
            vec![RecordedAction::Forward {
                token: "tok-1".to_string(),
                target: "sip:voicemail@ekiga.net".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_transfer_connected_call_with_target() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let target = resolver().resolve("sip:peer@ekiga.net").unwrap();
        dispatcher
            .transfer(CallingState::Connected, "tok-1", Some(&target))
            .await
            .unwrap();

        assert_eq!(
            transport.actions(),
            vec![RecordedAction::Transfer {
                token: "tok-1".to_string(),
                target: "sip:peer@ekiga.net".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_transfer_without_call_fails() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport);

        let result = dispatcher.transfer(CallingState::Standby, "tok-1", None).await;
        assert!(matches!(result, Err(DialError::NoActiveCall)));
    }

    #[tokio::test]
    async fn test_empty_target_never_reaches_transport() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        // 空串解析为空的 SIP 地址，不能把 "sip:" 当目的地提交
        let address = resolver().resolve("").unwrap();
        let result = dispatcher.place_call(CallingState::Standby, &address).await;

        assert!(matches!(result, Err(DialError::EmptyTarget)));
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_transfer_target_is_refused() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let target = resolver().resolve("").unwrap();
        let result = dispatcher
            .transfer(CallingState::Connected, "tok-1", Some(&target))
            .await;

        assert!(matches!(result, Err(DialError::EmptyTarget)));
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_message_to_empty_target_is_refused() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let address = resolver().resolve("").unwrap();
        let result = dispatcher.send_instant_message(&address, "hello").await;

        assert!(matches!(result, Err(DialError::EmptyTarget)));
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_refused() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let address = resolver().resolve("sip:bob@ekiga.net").unwrap();
        let result = dispatcher.send_instant_message(&address, "").await;

        assert!(matches!(result, Err(DialError::EmptyMessage)));
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_message_uses_plain_text_content_type() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = OutboundDispatcher::new(transport.clone());

        let address = resolver().resolve("bob").unwrap();
        dispatcher.send_instant_message(&address, "hello").await.unwrap();

        assert_eq!(
            transport.actions(),
            vec![RecordedAction::SendMessage {
                destination: "sip:bob@ekiga.net".to_string(),
                content_type: MESSAGE_CONTENT_TYPE.to_string(),
                body: "hello".to_string(),
            }]
        );
    }

    #[test]
    fn test_message_outcome_notices() {
        assert_eq!(message_outcome_notice(200), None);
        // 超时不打扰用户
        assert_eq!(message_outcome_notice(408), None);
        assert_eq!(
            message_outcome_notice(480),
            Some("Could not send message: user offline".to_string())
        );
        assert_eq!(
            message_outcome_notice(404),
            Some("Could not send message: Not found".to_string())
        );
    }
}
