/// SIP 端点核心模块
///
/// 把账户簿、注册状态机、来电准入、消息去重和出站调度
/// 装配成一个端点对象：
///
/// - 出站操作（注册、呼叫、发消息）通过 `TransportPort` 提交
/// - 入站事件由驱动方送进 `handle_event`
/// - 对外变化统一经由无界通道以 `EndpointEvent` 发布
///
/// ## 并发约定
///
/// 内部锁只保护纯内存状态，持锁期间不做任何 await；
/// 传输动词总是在锁释放之后提交
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::{AccountRegistry, Protocol};
use crate::address::{AddressResolver, DialPlan, PstnRule};
use crate::admission::{
    CallAdmissionPolicy, CallingState, Disposition, NoAnswerTimer, PendingCall,
};
use crate::config::EndpointConfig;
use crate::dispatch::{message_outcome_notice, OutboundDispatcher};
use crate::error::{DialResult, FailureReason};
use crate::messaging::MessageDeduplicator;
use crate::registration::{RegistrationSession, RegistrationState, MWI_INTERVAL};
use crate::transport::{
    CallToken, ClearReason, SubscriptionKind, TransportEvent, TransportPort,
};

/// 端点对外发布的事件
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    /// 账户注册状态变化
    RegistrationChanged {
        aor: String,
        state: RegistrationState,
        failure: Option<FailureReason>,
    },

    /// 留言摘要变化
    VoicemailChanged { aor: String, summary: String },

    /// 需要用户处置的来电
    IncomingCall {
        token: CallToken,
        display_name: String,
        remote: String,
    },

    /// 本地呼叫状态变化
    CallStateChanged {
        token: Option<CallToken>,
        state: CallingState,
    },

    /// 入站即时消息（已去重）
    IncomingMessage {
        from: String,
        display_name: String,
        body: String,
    },

    /// 一次性用户提示
    Notice {
        sender: String,
        display_name: String,
        reason: String,
    },
}

/// 当前呼叫上下文
struct CallContext {
    state: CallingState,
    pending: Option<PendingCall>,
    current_token: Option<CallToken>,
}

struct Inner {
    config: Mutex<EndpointConfig>,
    registry: AccountRegistry,
    /// AOR → 注册会话
    sessions: Mutex<HashMap<String, RegistrationSession>>,
    admission: CallAdmissionPolicy,
    no_answer_timer: NoAnswerTimer,
    dedup: Mutex<MessageDeduplicator>,
    dispatcher: OutboundDispatcher,
    transport: Arc<dyn TransportPort>,
    events: mpsc::UnboundedSender<EndpointEvent>,
    call: Mutex<CallContext>,
}

/// SIP 端点
#[derive(Clone)]
pub struct SipEndpoint {
    inner: Arc<Inner>,
}

impl SipEndpoint {
    /// 创建端点，返回端点本体和事件接收端
    pub fn new(
        registry: AccountRegistry,
        config: EndpointConfig,
        transport: Arc<dyn TransportPort>,
    ) -> (Self, mpsc::UnboundedReceiver<EndpointEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let dedup = MessageDeduplicator::new(config.dedup_capacity);

        let inner = Arc::new(Inner {
            config: Mutex::new(config),
            registry,
            sessions: Mutex::new(HashMap::new()),
            admission: CallAdmissionPolicy::new(),
            no_answer_timer: NoAnswerTimer::new(),
            dedup: Mutex::new(dedup),
            dispatcher: OutboundDispatcher::new(transport.clone()),
            transport,
            events,
            call: Mutex::new(CallContext {
                state: CallingState::Standby,
                pending: None,
                current_token: None,
            }),
        });

        (Self { inner }, receiver)
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.inner.registry
    }

    /// 更新在线状态
    pub fn set_presence(&self, presence: crate::config::Presence) {
        self.inner.config.lock().unwrap().presence = presence;
    }

    /// 当前呼叫状态
    pub fn calling_state(&self) -> CallingState {
        self.inner.call.lock().unwrap().state
    }

    /// 按账户簿和配置拼装当前拨号计划
    ///
    /// PSTN 改写规则只有在两个网关角色账户都满足条件时才注入：
    /// 默认网关账户须启用且为默认，电话网关账户须启用
    pub fn dial_plan(&self) -> DialPlan {
        let config = self.inner.config.lock().unwrap();

        let default_sip_host = self
            .inner
            .registry
            .default_for(Protocol::Sip)
            .filter(|a| a.enabled)
            .map(|a| a.host.split(':').next().unwrap_or_default().to_string());

        let pstn = match (&config.default_gateway_account, &config.phone_gateway_account) {
            (Some(default_id), Some(phone_id)) => {
                let default_ok = self
                    .inner
                    .registry
                    .find(default_id)
                    .is_some_and(|a| a.enabled && a.default_account);
                let phone = self
                    .inner
                    .registry
                    .find(phone_id)
                    .filter(|a| a.enabled);
                match (default_ok, phone) {
                    (true, Some(phone)) => Some(PstnRule {
                        prefix: config.pstn_prefix.clone(),
                        gateway_host: phone.host.clone(),
                    }),
                    _ => None,
                }
            }
            _ => None,
        };

        DialPlan {
            default_sip_host,
            h323_gateway: config.h323_gateway.clone(),
            pstn,
        }
    }

    /// 当前拨号计划下的地址解析器
    pub fn resolver(&self) -> AddressResolver {
        AddressResolver::new(self.dial_plan())
    }

    fn emit(&self, event: EndpointEvent) {
        let _ = self.inner.events.send(event);
    }

    fn set_calling_state(&self, state: CallingState) {
        let changed = {
            let mut call = self.inner.call.lock().unwrap();
            if call.state == state {
                None
            } else {
                call.state = state;
                let token = call
                    .pending
                    .as_ref()
                    .map(|p| p.token.clone())
                    .or_else(|| call.current_token.clone());
                if state == CallingState::Standby {
                    call.pending = None;
                    call.current_token = None;
                }
                Some(token)
            }
        };
        if let Some(token) = changed {
            self.emit(EndpointEvent::CallStateChanged { token, state });
        }
    }

    // ---- 注册 ----

    /// 按账户当前的启用状态提交注册或注销
    ///
    /// 账户不存在时静默忽略；同一账户的在途尝试会压制新请求
    pub async fn apply_account(&self, id: &Uuid) {
        let Some(account) = self.inner.registry.find(id) else {
            debug!("账户不存在，忽略注册请求: {}", id);
            return;
        };
        let aor = account.aor();

        let started = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let session = sessions
                .entry(aor.clone())
                .or_insert_with(|| RegistrationSession::new(&account));
            session.start(&account).map(|request| (request, session.state()))
        };
        let Some((request, state)) = started else {
            debug!("注册尝试在途，跳过: {}", aor);
            return;
        };

        info!("提交注册请求: {} (expires: {})", aor, request.expires);
        self.emit(EndpointEvent::RegistrationChanged {
            aor: aor.clone(),
            state,
            failure: None,
        });

        if let Err(e) = self.inner.transport.start_registration(request).await {
            warn!("注册请求提交失败: {} ({})", aor, e);
            let update = self
                .inner
                .sessions
                .lock()
                .unwrap()
                .get_mut(&aor)
                .map(|s| s.fail_submission());
            if let Some(update) = update {
                self.emit(EndpointEvent::RegistrationChanged {
                    aor: update.aor,
                    state: update.state,
                    failure: update.failure,
                });
            }
        }
    }

    /// 为所有启用的 SIP 账户提交注册
    pub async fn register_all(&self) {
        let accounts = self.inner.registry.list();
        for account in accounts {
            if account.enabled && account.protocol == Protocol::Sip {
                self.apply_account(&account.id).await;
            }
        }
    }

    /// 翻转账户启用状态并提交相应的注册/注销
    pub async fn toggle_account(&self, id: &Uuid) -> Result<bool, crate::error::RegistryError> {
        let enabled = self.inner.registry.toggle_enabled(id)?;
        self.apply_account(id).await;
        Ok(enabled)
    }

    /// 删除账户并丢弃其注册会话
    ///
    /// 之后到达的该账户注册结果按未知 AOR 静默忽略
    pub fn remove_account(&self, id: &Uuid) -> Result<(), crate::error::RegistryError> {
        let aor = self.inner.registry.find(id).map(|a| a.aor());
        self.inner.registry.remove(id)?;
        if let Some(aor) = aor {
            self.inner.sessions.lock().unwrap().remove(&aor);
        }
        Ok(())
    }

    // ---- 呼出 ----

    /// 发起呼出
    ///
    /// 传输层拒绝提交时回到空闲并发一条用户提示
    pub async fn place_call(&self, target: &str) -> DialResult<CallToken> {
        let address = self.resolver().resolve(target)?;
        let state = self.calling_state();

        match self.inner.dispatcher.place_call(state, &address).await {
            Ok(token) => {
                {
                    let mut call = self.inner.call.lock().unwrap();
                    call.current_token = Some(token.clone());
                    call.state = CallingState::Calling;
                }
                self.emit(EndpointEvent::CallStateChanged {
                    token: Some(token.clone()),
                    state: CallingState::Calling,
                });
                Ok(token)
            }
            Err(e) => {
                if matches!(e, crate::error::DialError::Transport(_)) {
                    self.emit(EndpointEvent::Notice {
                        sender: address.full_address(false),
                        display_name: String::new(),
                        reason: "Failed to call user".to_string(),
                    });
                    self.set_calling_state(CallingState::Standby);
                }
                Err(e)
            }
        }
    }

    /// 应答当前来电
    pub async fn answer(&self) -> DialResult<()> {
        let (state, token) = self.current_call()?;
        self.inner.no_answer_timer.disarm();
        self.inner.dispatcher.transfer(state, &token, None).await
    }

    /// 转移/转接当前呼叫到目标
    pub async fn transfer(&self, target: &str) -> DialResult<()> {
        let address = self.resolver().resolve(target)?;
        let (state, token) = self.current_call()?;
        self.inner
            .dispatcher
            .transfer(state, &token, Some(&address))
            .await
    }

    /// 挂断当前呼叫
    pub async fn hangup(&self) -> DialResult<()> {
        let (_, token) = self.current_call()?;
        self.inner.no_answer_timer.disarm();
        self.inner
            .transport
            .clear(&token, ClearReason::Declined)
            .await?;
        Ok(())
    }

    fn current_call(&self) -> DialResult<(CallingState, CallToken)> {
        let call = self.inner.call.lock().unwrap();
        let token = call
            .pending
            .as_ref()
            .map(|p| p.token.clone())
            .or_else(|| call.current_token.clone())
            .ok_or(crate::error::DialError::NoActiveCall)?;
        Ok((call.state, token))
    }

    /// 发送即时消息
    pub async fn send_message(&self, target: &str, body: &str) -> DialResult<()> {
        let address = self.resolver().resolve(target)?;
        self.inner
            .dispatcher
            .send_instant_message(&address, body)
            .await
    }

    /// 释放端点持有的后台任务
    pub fn shutdown(&self) {
        self.inner.no_answer_timer.disarm();
    }

    // ---- 入站事件 ----

    /// 处理传输层送入的事件
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::RegistrationSucceeded {
                aor,
                was_registering,
            } => {
                self.on_registration_outcome(aor, was_registering, None).await;
            }
            TransportEvent::RegistrationFailed {
                aor,
                was_registering,
                code,
            } => {
                self.on_registration_outcome(aor, was_registering, Some(code))
                    .await;
            }
            TransportEvent::IncomingSession {
                token,
                connection_id,
                display_name,
                remote,
                alert_info,
            } => {
                self.on_incoming_session(token, connection_id, display_name, remote, alert_info)
                    .await;
            }
            TransportEvent::SessionEstablished { token } => {
                if self.owns_call(&token) {
                    self.inner.no_answer_timer.disarm();
                    self.set_calling_state(CallingState::Connected);
                }
            }
            TransportEvent::SessionReleased { token } => {
                if self.owns_call(&token) {
                    self.inner.no_answer_timer.disarm();
                    self.set_calling_state(CallingState::Standby);
                }
            }
            TransportEvent::IncomingMessage {
                from,
                display_name,
                dialog_id,
                body,
            } => {
                let deliver = self
                    .inner
                    .dedup
                    .lock()
                    .unwrap()
                    .should_deliver(&from, &dialog_id);
                if deliver {
                    self.emit(EndpointEvent::IncomingMessage {
                        from,
                        display_name,
                        body,
                    });
                } else {
                    debug!("重复消息已丢弃: {} ({})", from, dialog_id);
                }
            }
            TransportEvent::MessageOutcome {
                destination,
                display_name,
                code,
            } => {
                if let Some(reason) = message_outcome_notice(code) {
                    debug!("消息投递失败: {} (code: {})", destination, code);
                    self.emit(EndpointEvent::Notice {
                        sender: destination,
                        display_name,
                        reason,
                    });
                }
            }
            TransportEvent::MwiNotification { aor, summary } => {
                let changed = self
                    .inner
                    .sessions
                    .lock()
                    .unwrap()
                    .get_mut(&aor)
                    .and_then(|s| s.update_mwi(&summary));
                if let Some(summary) = changed {
                    info!("留言摘要更新: {} -> {}", aor, summary);
                    self.emit(EndpointEvent::VoicemailChanged { aor, summary });
                }
            }
        }
    }

    fn owns_call(&self, token: &str) -> bool {
        let call = self.inner.call.lock().unwrap();
        call.current_token.as_deref() == Some(token)
            || call.pending.as_ref().is_some_and(|p| p.token == token)
    }

    async fn on_registration_outcome(&self, aor: String, was_registering: bool, code: Option<u16>) {
        let update = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            match sessions.get_mut(&aor) {
                Some(session) => session.apply_outcome(was_registering, code),
                None => {
                    debug!("未知 AOR 的注册结果，忽略: {}", aor);
                    return;
                }
            }
        };
        let Some(update) = update else {
            // 主动撤销的回声，静默
            return;
        };

        info!("注册状态: {} -> {}", update.aor, update.state);
        self.emit(EndpointEvent::RegistrationChanged {
            aor: update.aor.clone(),
            state: update.state,
            failure: update.failure,
        });

        let subscribe = self
            .inner
            .sessions
            .lock()
            .unwrap()
            .get_mut(&aor)
            .is_some_and(|s| s.take_mwi_subscription());
        if subscribe {
            if let Err(e) = self
                .inner
                .transport
                .subscribe(SubscriptionKind::MessageSummary, aor.clone(), MWI_INTERVAL)
                .await
            {
                warn!("MWI 订阅提交失败: {} ({})", aor, e);
            }
        }
    }

    async fn on_incoming_session(
        &self,
        token: CallToken,
        connection_id: String,
        display_name: String,
        remote: String,
        alert_info: Option<String>,
    ) {
        if let Some(header) = alert_info.as_deref() {
            self.inner.admission.note_alert_info(header);
        }

        let (decision, state) = {
            let call = self.inner.call.lock().unwrap();
            // 重复通知按整个呼叫上下文判定：
            // 振铃中的来电比连接标识，呼出中的会话比令牌
            let is_duplicate = call
                .pending
                .as_ref()
                .is_some_and(|p| p.connection_id == connection_id)
                || call.current_token.as_deref() == Some(token.as_str());
            let config = self.inner.config.lock().unwrap();
            (
                self.inner.admission.decide(call.state, is_duplicate, &config),
                call.state,
            )
        };
        debug!("来电处置: {} -> {:?}", remote, decision);

        match decision {
            Disposition::AcceptSilently => {}
            Disposition::Reject => {
                let reason = if state != CallingState::Standby {
                    ClearReason::LocalBusy
                } else {
                    ClearReason::Declined
                };
                if let Err(e) = self.inner.transport.clear(&token, reason).await {
                    warn!("拒绝来电失败: {}", e);
                }
            }
            Disposition::Forward(target) => {
                info!("来电转移: {} -> {}", remote, target);
                if let Err(e) = self.inner.transport.forward(&token, target).await {
                    warn!("来电转移失败: {}", e);
                }
            }
            Disposition::AutoAnswer => {
                self.track_pending(token.clone(), connection_id, &display_name, &remote);
                info!("自动应答来电: {}", remote);
                self.emit(EndpointEvent::IncomingCall {
                    token: token.clone(),
                    display_name,
                    remote,
                });
                if let Err(e) = self.inner.transport.answer(&token).await {
                    warn!("自动应答失败: {}", e);
                }
            }
            Disposition::AskUser { deadline } => {
                self.track_pending(token.clone(), connection_id, &display_name, &remote);
                self.emit(EndpointEvent::IncomingCall {
                    token: token.clone(),
                    display_name,
                    remote,
                });

                let endpoint = self.clone();
                let pending_token = token.clone();
                self.inner.no_answer_timer.arm(deadline, move || async move {
                    endpoint.on_no_answer(&pending_token).await;
                });
            }
        }
    }

    fn track_pending(
        &self,
        token: CallToken,
        connection_id: String,
        display_name: &str,
        remote: &str,
    ) {
        {
            let mut call = self.inner.call.lock().unwrap();
            call.pending = Some(PendingCall {
                token: token.clone(),
                connection_id,
                display_name: display_name.to_string(),
                remote: remote.to_string(),
            });
            call.state = CallingState::Called;
        }
        self.emit(EndpointEvent::CallStateChanged {
            token: Some(token),
            state: CallingState::Called,
        });
    }

    /// 无应答定时器触发：有无应答转移目标就转移，否则按无应答清除
    async fn on_no_answer(&self, token: &str) {
        let still_ringing = {
            let call = self.inner.call.lock().unwrap();
            call.state == CallingState::Called
                && call.pending.as_ref().is_some_and(|p| p.token == token)
        };
        if !still_ringing {
            return;
        }

        let target = {
            let config = self.inner.config.lock().unwrap();
            config
                .forwarding
                .forward_on_no_answer
                .clone()
                .filter(|t| !t.is_empty())
        };

        let result = match target {
            Some(target) => {
                info!("无应答，来电转移到 {}", target);
                self.inner.transport.forward(token, target).await
            }
            None => {
                info!("无应答，清除来电");
                self.inner.transport.clear(token, ClearReason::NoAnswer).await
            }
        };
        if let Err(e) = result {
            warn!("无应答处置失败: {}", e);
        }
    }
}
