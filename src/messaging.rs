/// 即时消息去重模块
///
/// SIP MESSAGE 可能随事务重传重复送达。按"发送方 → 最近对话标识"
/// 记账：同一发送方携带同一对话标识的消息只投递一次，
/// 新的对话标识会覆盖旧记录并放行
use std::collections::{HashMap, VecDeque};

/// 发送方地址规整
///
/// 去掉第一个 `;` 起的参数部分；截断导致 `<` 失配时补回 `>`
pub fn normalize_sender(raw: &str) -> String {
    let mut sender = match raw.find(';') {
        Some(pos) => &raw[..pos],
        None => raw,
    }
    .to_string();

    if sender.contains('<') && !sender.contains('>') {
        sender.push('>');
    }
    sender
}

/// 消息去重表
///
/// 默认不设容量上限；设置容量后按先进先出淘汰最旧的发送方记录
pub struct MessageDeduplicator {
    last_dialog: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: Option<usize>,
}

impl MessageDeduplicator {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            last_dialog: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// 判断消息是否应投递，并更新记账
    ///
    /// 投递条件：发送方没有记录，或记录的对话标识与本条不同
    pub fn should_deliver(&mut self, sender: &str, dialog_id: &str) -> bool {
        let sender = normalize_sender(sender);

        if self.last_dialog.get(&sender).map(String::as_str) == Some(dialog_id) {
            return false;
        }

        if self.last_dialog.insert(sender.clone(), dialog_id.to_string()).is_none() {
            self.order.push_back(sender);
            self.evict();
        }
        true
    }

    fn evict(&mut self) {
        if let Some(capacity) = self.capacity {
            while self.order.len() > capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.last_dialog.remove(&oldest);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last_dialog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_dialog.is_empty()
    }
}
