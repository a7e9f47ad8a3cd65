/// 地址解析模块
///
/// 把用户输入的目标字符串解析为带方案标签的可拨地址，
/// 并按拨号计划补全默认域/网关。支持的方案：
///
/// - `sip:`    默认端口 5060
/// - `h323:`   默认端口 1720
/// - `callto:` 目录服务地址（带 `/` 时追加 `+type=directory`）
/// - 快捷号    以 `#` 收尾的本地速拨串（`#` 只能出现在末尾）
///
/// 归一化（补域、拆端口）是惰性的：第一次取可拨形式时执行一次
use std::sync::OnceLock;

use crate::error::{DialError, DialResult};

/// 地址方案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScheme {
    Sip,
    H323,
    Callto,
    /// 本地速拨（无方案、无端口）
    Shortcut,
}

impl AddressScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressScheme::Sip => "sip",
            AddressScheme::H323 => "h323",
            AddressScheme::Callto => "callto",
            AddressScheme::Shortcut => "shortcut",
        }
    }

    /// 方案默认端口
    fn default_port(&self) -> Option<&'static str> {
        match self {
            AddressScheme::Sip => Some("5060"),
            AddressScheme::H323 => Some("1720"),
            _ => None,
        }
    }
}

/// PC-To-Phone 改写规则
///
/// 拨号串以 `prefix` 开头时剥掉前缀并送往电话网关。
/// 该规则只有在网关角色账户满足启用条件时才会被注入（见 endpoint 模块）
#[derive(Debug, Clone)]
pub struct PstnRule {
    pub prefix: String,
    pub gateway_host: String,
}

/// 拨号计划：惰性归一化所需的上下文快照
#[derive(Debug, Clone, Default)]
pub struct DialPlan {
    /// 默认 SIP 账户的 host，裸分机号会补上 `@host`
    pub default_sip_host: Option<String>,

    /// 默认 H.323 网关
    pub h323_gateway: Option<String>,

    /// PC-To-Phone 改写规则
    pub pstn: Option<PstnRule>,
}

/// 归一化结果，只计算一次
#[derive(Debug, Clone)]
struct Parsed {
    url: String,
    port: Option<String>,
}

/// 已解析的可拨地址
#[derive(Debug)]
pub struct Address {
    scheme: AddressScheme,
    raw: String,
    plan: DialPlan,
    parsed: OnceLock<Parsed>,
}

/// 地址解析器
pub struct AddressResolver {
    plan: DialPlan,
}

impl AddressResolver {
    pub fn new(plan: DialPlan) -> Self {
        Self { plan }
    }

    /// 解析原始目标字符串
    ///
    /// 不识别的方案返回 `DialError::Unsupported`，
    /// 这种地址永远不会到达传输层
    pub fn resolve(&self, raw: &str) -> DialResult<Address> {
        let s = raw.replacen("//", "", 1);
        let s = s.trim().to_string();

        let (scheme, rest) = if !s.is_empty() && s.find('#') == Some(s.len() - 1) {
            // 速拨形式：第一个 '#' 必须同时是末字符；
            // 剥掉任意方案前缀和这一个 '#'
            let stripped = s
                .replacen("callto:", "", 1)
                .replacen("h323:", "", 1)
                .replacen("sip:", "", 1);
            let stripped = match stripped.strip_suffix('#') {
                Some(body) => body.to_string(),
                None => stripped,
            };
            (AddressScheme::Shortcut, stripped)
        } else if let Some(rest) = s.strip_prefix("callto:") {
            (AddressScheme::Callto, rest.to_string())
        } else if let Some(rest) = s.strip_prefix("h323:") {
            (AddressScheme::H323, rest.to_string())
        } else if let Some(rest) = s.strip_prefix("sip:") {
            (AddressScheme::Sip, rest.to_string())
        } else if !s.contains("callto:") && !s.contains("h323:") && !s.contains("sip:") {
            // 无任何方案标记：带 '/' 视为 callto，否则视为 sip
            if s.contains('/') {
                (AddressScheme::Callto, s)
            } else {
                (AddressScheme::Sip, s)
            }
        } else {
            // 方案标记出现在中间，含义不明确
            return Err(DialError::unsupported(raw));
        };

        Ok(Address {
            scheme,
            raw: rest,
            plan: self.plan.clone(),
            parsed: OnceLock::new(),
        })
    }
}

impl Address {
    pub fn scheme(&self) -> AddressScheme {
        self.scheme
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// 惰性归一化：补默认域/网关，拆出尾部端口。只执行一次
    fn parsed(&self) -> &Parsed {
        self.parsed.get_or_init(|| {
            let mut url = self.raw.clone();

            if !url.is_empty() {
                match self.scheme {
                    AddressScheme::Sip => {
                        // 裸分机号（无 @、无 .、无 +）补上默认账户的 host
                        if let Some(host) = &self.plan.default_sip_host {
                            if !url.contains('@') && !url.contains('.') && !url.contains('+') {
                                match &self.plan.pstn {
                                    Some(rule) if url.starts_with(rule.prefix.as_str()) => {
                                        url = format!(
                                            "{}@{}",
                                            &url[rule.prefix.len()..],
                                            rule.gateway_host
                                        );
                                    }
                                    _ => url = format!("{}@{}", url, host),
                                }
                            }
                        }
                    }
                    AddressScheme::H323 => {
                        if let Some(gateway) = &self.plan.h323_gateway {
                            if !gateway.is_empty() && !url.contains(gateway.as_str()) {
                                url = format!("{}@{}", url, gateway);
                            }
                        }
                    }
                    _ => {}
                }
            }

            let port = match url.find(':') {
                Some(i) => {
                    let p = url[i + 1..].to_string();
                    url.truncate(i);
                    Some(p)
                }
                None => None,
            };

            Parsed { url, port }
        })
    }

    /// 完整可拨形式
    ///
    /// `include_default_port` 为 true 时 sip/h323 地址总是带端口，
    /// 否则仅在端口不是方案默认值时才带
    pub fn full_address(&self, include_default_port: bool) -> String {
        let parsed = self.parsed();

        match self.scheme {
            AddressScheme::Shortcut => parsed.url.clone(),
            AddressScheme::Callto
                if parsed.url.contains('/') && !parsed.url.contains("type=") =>
            {
                format!("callto:{}+type=directory", parsed.url)
            }
            AddressScheme::Sip | AddressScheme::H323 => {
                let default_port = self.scheme.default_port().unwrap_or_default();
                let port = parsed.port.as_deref().unwrap_or(default_port);

                if include_default_port || port != default_port {
                    format!("{}:{}:{}", self.scheme.as_str(), parsed.url, port)
                } else {
                    format!("{}:{}", self.scheme.as_str(), parsed.url)
                }
            }
            _ => format!("{}:{}", self.scheme.as_str(), parsed.url),
        }
    }

    /// 规范比较形式：host[:port]，不含方案
    pub fn canonical(&self) -> String {
        let parsed = self.parsed();
        match &parsed.port {
            Some(port) if !parsed.url.is_empty() => format!("{}:{}", parsed.url, port),
            _ => parsed.url.clone(),
        }
    }

    /// callto 地址 `server/email` 中的 email 部分
    fn callto_email(&self) -> Option<&str> {
        if self.scheme != AddressScheme::Callto {
            return None;
        }
        let parsed = self.parsed();
        parsed.url.find('/').map(|i| &parsed.url[i + 1..])
    }

    /// 前缀匹配：用于通讯录/历史记录查找
    ///
    /// 带 callto email 后缀时按 email 比较，否则按规范形式比较
    pub fn matches(&self, other: &Address) -> bool {
        match self.callto_email() {
            Some(email) if !email.is_empty() => match other.callto_email() {
                Some(other_email) if !other_email.is_empty() => email.starts_with(other_email),
                _ => email.starts_with(other.canonical().as_str()),
            },
            _ => self.parsed().url.starts_with(other.canonical().as_str()),
        }
    }
}

impl PartialEq for Address {
    /// 两个地址相等当且仅当完整形式（不强制默认端口）一致，忽略大小写
    fn eq(&self, other: &Self) -> bool {
        self.full_address(false)
            .eq_ignore_ascii_case(&other.full_address(false))
    }
}

impl Clone for Address {
    fn clone(&self) -> Self {
        let parsed = OnceLock::new();
        if let Some(p) = self.parsed.get() {
            let _ = parsed.set(p.clone());
        }
        Self {
            scheme: self.scheme,
            raw: self.raw.clone(),
            plan: self.plan.clone(),
            parsed,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_address(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> AddressResolver {
        AddressResolver::new(DialPlan::default())
    }

    #[test]
    fn test_bare_address_is_sip() {
        let a = resolver().resolve("alice@example.com").unwrap();
        assert_eq!(a.scheme(), AddressScheme::Sip);
        // 默认端口 5060 不强制时省略
        assert_eq!(a.full_address(false), "sip:alice@example.com");
        assert_eq!(a.full_address(true), "sip:alice@example.com:5060");
    }

    #[test]
    fn test_shortcut() {
        let a = resolver().resolve("123#").unwrap();
        assert_eq!(a.scheme(), AddressScheme::Shortcut);
        assert_eq!(a.full_address(false), "123");
    }

    #[test]
    fn test_shortcut_strips_scheme() {
        let a = resolver().resolve("sip:123#").unwrap();
        assert_eq!(a.scheme(), AddressScheme::Shortcut);
        assert_eq!(a.full_address(false), "123");
    }

    #[test]
    fn test_interior_hash_is_not_shortcut() {
        // '#' 不是唯一的末字符时按裸 sip 地址处理
        let a = resolver().resolve("12#3#").unwrap();
        assert_eq!(a.scheme(), AddressScheme::Sip);
        assert_eq!(a.full_address(false), "sip:12#3#");

        let b = resolver().resolve("123##").unwrap();
        assert_eq!(b.scheme(), AddressScheme::Sip);
    }

    #[test]
    fn test_callto_directory() {
        let a = resolver().resolve("callto:host/user@mail").unwrap();
        assert_eq!(a.scheme(), AddressScheme::Callto);
        assert!(a.full_address(false).ends_with("+type=directory"));
    }

    #[test]
    fn test_bare_with_slash_is_callto() {
        let a = resolver().resolve("ils.server/someone@mail").unwrap();
        assert_eq!(a.scheme(), AddressScheme::Callto);
    }

    #[test]
    fn test_ambiguous_scheme_unsupported() {
        // 方案标记不在开头，含义不明确
        assert!(resolver().resolve("foosip:alice").is_err());
    }

    #[test]
    fn test_explicit_port_kept() {
        let a = resolver().resolve("sip:alice@example.com:5070").unwrap();
        assert_eq!(a.full_address(false), "sip:alice@example.com:5070");
    }

    #[test]
    fn test_leading_slashes_stripped() {
        let a = resolver().resolve("sip://alice@example.com").unwrap();
        assert_eq!(a.full_address(false), "sip:alice@example.com");
    }

    #[test]
    fn test_bare_extension_gets_default_host() {
        let plan = DialPlan {
            default_sip_host: Some("ekiga.net".to_string()),
            ..Default::default()
        };
        let a = AddressResolver::new(plan).resolve("613").unwrap();
        assert_eq!(a.full_address(false), "sip:613@ekiga.net");
    }

    #[test]
    fn test_pstn_prefix_rewritten_to_phone_gateway() {
        let plan = DialPlan {
            default_sip_host: Some("ekiga.net".to_string()),
            pstn: Some(PstnRule {
                prefix: "00".to_string(),
                gateway_host: "gw.phone.example".to_string(),
            }),
            ..Default::default()
        };
        let a = AddressResolver::new(plan).resolve("0032123456").unwrap();
        assert_eq!(a.full_address(false), "sip:32123456@gw.phone.example");
    }

    #[test]
    fn test_full_address_without_rule_keeps_prefix() {
        // 无 PSTN 规则时 00 开头的号码照常补默认域
        let plan = DialPlan {
            default_sip_host: Some("ekiga.net".to_string()),
            ..Default::default()
        };
        let a = AddressResolver::new(plan).resolve("0032123456").unwrap();
        assert_eq!(a.full_address(false), "sip:0032123456@ekiga.net");
    }

    #[test]
    fn test_h323_gateway_appended() {
        let plan = DialPlan {
            h323_gateway: Some("gk.example.com".to_string()),
            ..Default::default()
        };
        let a = AddressResolver::new(plan).resolve("h323:601").unwrap();
        assert_eq!(a.full_address(false), "h323:601@gk.example.com");
        assert_eq!(a.full_address(true), "h323:601@gk.example.com:1720");
    }

    #[test]
    fn test_round_trip() {
        for raw in ["alice@example.com", "sip:bob@b.org:5080", "h323:gw.example.com"] {
            let a = resolver().resolve(raw).unwrap();
            let full = a.full_address(true);
            let b = resolver().resolve(&full).unwrap();
            assert_eq!(b.full_address(true), full);
        }
    }

    #[test]
    fn test_equality_ignores_case_and_default_port() {
        let r = resolver();
        let a = r.resolve("sip:Alice@Example.com").unwrap();
        let b = r.resolve("alice@example.com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_matches_canonical_prefix() {
        let r = resolver();
        let a = r.resolve("sip:alice@example.com").unwrap();
        let b = r.resolve("alice@example").unwrap();
        assert!(a.matches(&b));
        assert!(!b.matches(&a));
    }

    #[test]
    fn test_matches_callto_email() {
        let r = resolver();
        let a = r.resolve("callto:ils.net/alice@mail.com").unwrap();
        let b = r.resolve("callto:other.net/alice@mail.com").unwrap();
        assert!(a.matches(&b));
    }
}
