/// 账户管理模块
///
/// 持有每个协议的账户配置并维护"每协议至多一个默认账户"的不变量。
/// 注册表的变更与注册回调共享同一把锁：回调引用的账户若已删除，
/// 查找会落空并被上层静默忽略
use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RegistryError;

/// 账户协议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Sip,
    H323,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sip => "sip",
            Protocol::H323 => "h323",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("sip") {
            Some(Protocol::Sip)
        } else if s.eq_ignore_ascii_case("h323") {
            Some(Protocol::H323)
        } else {
            None
        }
    }
}

/// 一个已配置的账户身份
#[derive(Debug, Clone)]
pub struct Account {
    /// 唯一标识
    pub id: Uuid,

    /// 显示名
    pub name: String,

    /// 协议
    pub protocol: Protocol,

    /// 注册服务器 / 网守
    pub host: String,

    /// 认证域 (realm / gatekeeper ID)
    pub domain: String,

    /// 用户名
    pub username: String,

    /// 认证用户名
    pub auth_username: String,

    /// 密码
    pub password: String,

    /// 是否启用
    pub enabled: bool,

    /// 是否为该协议的默认账户
    pub default_account: bool,

    /// 注册超时（秒），0 表示采用默认值 3600
    pub timeout: u32,
}

/// 注册超时的默认值与下限
const DEFAULT_TIMEOUT: u32 = 3600;
const MIN_TIMEOUT: u32 = 25;

/// 账户字段的持久化分隔符，任何字段不得包含
const FIELD_SEPARATOR: char = '|';

impl Account {
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            protocol,
            host: host.into(),
            domain: String::new(),
            username: username.into(),
            auth_username: String::new(),
            password: password.into(),
            enabled: false,
            default_account: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 地址记录 (AOR)：`username@host`，用户名已含 `@` 时原样使用。
    /// host 内嵌的端口不进入 AOR
    pub fn aor(&self) -> String {
        if self.username.contains('@') {
            self.username.clone()
        } else {
            let host = self.host.split(':').next().unwrap_or_default();
            format!("{}@{}", self.username, host)
        }
    }

    /// 生效的认证用户名：未显式设置时退回用户名（的用户部分）
    pub fn effective_auth_username(&self) -> String {
        if !self.auth_username.is_empty() {
            return self.auth_username.clone();
        }
        match self.username.split_once('@') {
            Some((user, _)) => user.to_string(),
            None => self.username.clone(),
        }
    }

    /// 生效的注册超时：0 取默认 3600，否则下限 25 秒
    pub fn effective_timeout(&self) -> u32 {
        if self.timeout == 0 {
            DEFAULT_TIMEOUT
        } else {
            self.timeout.max(MIN_TIMEOUT)
        }
    }

    /// 字段合法性检查
    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.username.is_empty() {
            return Err(RegistryError::EmptyUsername);
        }
        for (field, value) in [
            ("username", &self.username),
            ("auth_username", &self.auth_username),
            ("name", &self.name),
            ("host", &self.host),
            ("password", &self.password),
            ("domain", &self.domain),
        ] {
            if value.contains(FIELD_SEPARATOR) {
                return Err(RegistryError::IllegalSeparator(field));
            }
        }
        Ok(())
    }

    /// 补全空缺字段
    ///
    /// - domain：SIP 账户取用户名 `@` 后的部分，否则取 host
    /// - auth_username：用户名含 `@` 时取其用户部分，否则取用户名
    fn fill_defaults(&mut self) {
        if self.domain.is_empty() && self.protocol == Protocol::Sip {
            self.domain = match self.username.split_once('@') {
                Some((_, host)) => host.to_string(),
                None => self.host.clone(),
            };
        }
        if self.auth_username.is_empty() {
            self.auth_username = match self.username.split_once('@') {
                Some((user, _)) => user.to_string(),
                None => self.username.clone(),
            };
        }
    }
}

struct RegistryInner {
    /// 保持插入顺序，默认账户的继任规则依赖这一点
    accounts: Vec<Account>,

    /// host → 已注册 AOR，用于对外显示注册方名称
    aor_by_host: HashMap<String, String>,
}

/// 账户注册表
pub struct AccountRegistry {
    inner: Mutex<RegistryInner>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                accounts: Vec::new(),
                aor_by_host: HashMap::new(),
            }),
        }
    }

    /// 添加账户
    ///
    /// 第一个账户自动成为默认账户；若声明为默认，
    /// 同协议其他账户的默认标记在同一把锁内被清除
    pub fn add(&self, mut account: Account) -> Result<Uuid, RegistryError> {
        account.validate()?;
        account.fill_defaults();

        let mut inner = self.inner.lock().unwrap();

        if inner.accounts.is_empty() {
            account.default_account = true;
        }
        if account.default_account {
            let protocol = account.protocol;
            for other in inner.accounts.iter_mut() {
                if other.protocol == protocol {
                    other.default_account = false;
                }
            }
        }

        info!("添加账户: {} ({})", account.name, account.protocol.as_str());
        let id = account.id;
        inner
            .aor_by_host
            .insert(account.host.clone(), account.aor());
        inner.accounts.push(account);
        Ok(id)
    }

    /// 删除账户
    ///
    /// 被删账户若是默认账户，按存储顺序把第一个同协议账户提升为默认，
    /// 删除与提升在同一把锁内完成
    pub fn remove(&self, id: &Uuid) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();

        let pos = inner
            .accounts
            .iter()
            .position(|a| a.id == *id)
            .ok_or(RegistryError::UnknownAccount(*id))?;

        let removed = inner.accounts.remove(pos);
        inner.aor_by_host.remove(&removed.host);

        if removed.default_account {
            if let Some(successor) = inner
                .accounts
                .iter_mut()
                .find(|a| a.protocol == removed.protocol)
            {
                debug!("默认账户被删除，提升 {} 为默认", successor.name);
                successor.default_account = true;
            }
        }

        info!("删除账户: {}", removed.name);
        Ok(())
    }

    /// 编辑账户（按 id 原位替换，重新校验）
    pub fn update(&self, mut account: Account) -> Result<(), RegistryError> {
        account.validate()?;
        account.fill_defaults();

        let mut inner = self.inner.lock().unwrap();

        let pos = inner
            .accounts
            .iter()
            .position(|a| a.id == account.id)
            .ok_or(RegistryError::UnknownAccount(account.id))?;

        if account.default_account {
            let protocol = account.protocol;
            let id = account.id;
            for other in inner.accounts.iter_mut() {
                if other.protocol == protocol && other.id != id {
                    other.default_account = false;
                }
            }
        }

        let old_host = inner.accounts[pos].host.clone();
        inner.aor_by_host.remove(&old_host);
        inner
            .aor_by_host
            .insert(account.host.clone(), account.aor());
        inner.accounts[pos] = account;
        Ok(())
    }

    /// 设置/取消默认账户
    ///
    /// 每协议同一时刻只有一个默认账户。账户不存在时返回 false
    pub fn set_default(&self, id: &Uuid, default: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let protocol = match inner.accounts.iter().find(|a| a.id == *id) {
            Some(a) => a.protocol,
            None => return false,
        };

        for account in inner.accounts.iter_mut() {
            if account.protocol != protocol {
                continue;
            }
            if account.id == *id {
                account.default_account = default;
            } else if default {
                account.default_account = false;
            }
        }
        true
    }

    /// 启用/停用切换
    ///
    /// H.323 同一时刻只允许一个账户启用：启用某个 H.323 账户时
    /// 其余 H.323 账户一并停用
    pub fn toggle_enabled(&self, id: &Uuid) -> Result<bool, RegistryError> {
        let mut inner = self.inner.lock().unwrap();

        let (protocol, enabling) = match inner.accounts.iter().find(|a| a.id == *id) {
            Some(a) => (a.protocol, !a.enabled),
            None => return Err(RegistryError::UnknownAccount(*id)),
        };

        for account in inner.accounts.iter_mut() {
            if account.id == *id {
                account.enabled = enabling;
            } else if protocol == Protocol::H323 && account.protocol == Protocol::H323 && enabling
            {
                account.enabled = false;
            }
        }
        Ok(enabling)
    }

    pub fn find(&self, id: &Uuid) -> Option<Account> {
        let inner = self.inner.lock().unwrap();
        inner.accounts.iter().find(|a| a.id == *id).cloned()
    }

    /// 按 AOR 查找（注册回调以 AOR 标识账户）
    pub fn find_by_aor(&self, aor: &str) -> Option<Account> {
        let needle = aor.strip_prefix("sip:").unwrap_or(aor);
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .iter()
            .find(|a| a.aor() == needle)
            .cloned()
    }

    /// 按 host 或 domain 查找
    pub fn find_by_host_or_domain(&self, key: &str) -> Option<Account> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .iter()
            .find(|a| a.host == key || a.domain == key)
            .cloned()
    }

    /// 某协议的默认账户
    pub fn default_for(&self, protocol: Protocol) -> Option<Account> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .iter()
            .find(|a| a.protocol == protocol && a.default_account)
            .cloned()
    }

    pub fn list(&self) -> Vec<Account> {
        self.inner.lock().unwrap().accounts.clone()
    }

    /// 对外显示的注册方名称
    ///
    /// 优先采用启用中的默认 SIP 账户的 AOR，
    /// 否则回退到该 host 已注册的 AOR
    pub fn registered_party_name(&self, host: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();

        let registered = inner.aor_by_host.get(host);

        if let Some(account) = inner
            .accounts
            .iter()
            .find(|a| a.protocol == Protocol::Sip && a.default_account && a.enabled)
        {
            let account_host = account.host.split(':').next().unwrap_or_default();
            if registered.is_none() || account_host == host {
                return Some(account.aor());
            }
        }

        registered.cloned()
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sip_account(name: &str, host: &str) -> Account {
        Account::new(name, Protocol::Sip, host, name, "secret")
    }

    #[test]
    fn test_first_account_becomes_default() {
        let registry = AccountRegistry::new();
        let id = registry.add(sip_account("alice", "ekiga.net")).unwrap();
        assert!(registry.find(&id).unwrap().default_account);
    }

    #[test]
    fn test_exactly_one_default_per_protocol() {
        let registry = AccountRegistry::new();
        let a = registry.add(sip_account("alice", "a.net")).unwrap();
        let b = registry.add(sip_account("bob", "b.net")).unwrap();

        assert!(registry.set_default(&a, true));
        assert!(registry.set_default(&b, true));

        let defaults: Vec<_> = registry
            .list()
            .into_iter()
            .filter(|a| a.default_account)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, b);
    }

    #[test]
    fn test_set_default_unknown_account() {
        let registry = AccountRegistry::new();
        assert!(!registry.set_default(&Uuid::new_v4(), true));
    }

    #[test]
    fn test_removing_default_promotes_first_sibling() {
        let registry = AccountRegistry::new();
        let a = registry.add(sip_account("alice", "a.net")).unwrap();
        let b = registry.add(sip_account("bob", "b.net")).unwrap();
        let c = registry.add(sip_account("carol", "c.net")).unwrap();
        registry.set_default(&a, true);

        registry.remove(&a).unwrap();

        assert!(registry.find(&b).unwrap().default_account);
        assert!(!registry.find(&c).unwrap().default_account);
    }

    #[test]
    fn test_validation_rejects_separator() {
        let registry = AccountRegistry::new();
        let account = sip_account("al|ice", "a.net");
        assert!(matches!(
            registry.add(account),
            Err(RegistryError::IllegalSeparator(_))
        ));
    }

    #[test]
    fn test_validation_rejects_empty_username() {
        let registry = AccountRegistry::new();
        let mut account = sip_account("alice", "a.net");
        account.username = String::new();
        assert!(matches!(
            registry.add(account),
            Err(RegistryError::EmptyUsername)
        ));
    }

    #[test]
    fn test_aor_derivation() {
        let mut account = sip_account("alice", "ekiga.net:5060");
        assert_eq!(account.aor(), "alice@ekiga.net");

        account.username = "alice@example.org".to_string();
        assert_eq!(account.aor(), "alice@example.org");
    }

    #[test]
    fn test_defaults_filled_on_add() {
        let registry = AccountRegistry::new();
        let mut account = sip_account("alice", "a.net");
        account.username = "alice@example.org".to_string();
        let id = registry.add(account).unwrap();

        let stored = registry.find(&id).unwrap();
        assert_eq!(stored.domain, "example.org");
        assert_eq!(stored.auth_username, "alice");
    }

    #[test]
    fn test_effective_timeout() {
        let account = sip_account("alice", "a.net").with_timeout(0);
        assert_eq!(account.effective_timeout(), 3600);

        let account = sip_account("alice", "a.net").with_timeout(10);
        assert_eq!(account.effective_timeout(), 25);

        let account = sip_account("alice", "a.net").with_timeout(600);
        assert_eq!(account.effective_timeout(), 600);
    }

    #[test]
    fn test_h323_single_enabled() {
        let registry = AccountRegistry::new();
        let a = registry
            .add(Account::new("gk1", Protocol::H323, "gk1.net", "u1", "p"))
            .unwrap();
        let b = registry
            .add(Account::new("gk2", Protocol::H323, "gk2.net", "u2", "p"))
            .unwrap();

        registry.toggle_enabled(&a).unwrap();
        registry.toggle_enabled(&b).unwrap();

        assert!(!registry.find(&a).unwrap().enabled);
        assert!(registry.find(&b).unwrap().enabled);
    }

    #[test]
    fn test_registered_party_name_prefers_default_account() {
        let registry = AccountRegistry::new();
        let id = registry
            .add(sip_account("alice", "ekiga.net").with_enabled(true))
            .unwrap();
        registry.set_default(&id, true);

        assert_eq!(
            registry.registered_party_name("ekiga.net").as_deref(),
            Some("alice@ekiga.net")
        );
    }
}
