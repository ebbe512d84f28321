//! 当前会话的消息存储
//!
//! 记录按插入顺序排列。一条记录要么是乐观插入的待确认记录（本地临时 ID），
//! 要么是服务端确认的记录（服务端 ID）。
//!
//! 不变量：
//! - 每个服务端 ID 至多一条记录
//! - 每个本地临时 ID 至多一条未确认记录

use chrono::{DateTime, Utc};

use crate::model::{ConversationId, LocalId, Message, MessageId, User};

/// 记录的投递状态
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    /// 已乐观插入，等待服务端确认
    Pending { local_id: LocalId },
    /// 已由服务端确认
    Confirmed { server_id: MessageId },
}

/// 存储中的一条消息记录
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub state: DeliveryState,
    pub conversation_id: ConversationId,
    pub sender: User,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

impl MessageRecord {
    /// 构造待确认记录
    pub fn pending(
        local_id: LocalId,
        conversation_id: ConversationId,
        sender: User,
        content: String,
    ) -> Self {
        Self {
            state: DeliveryState::Pending { local_id },
            conversation_id,
            sender,
            content,
            timestamp: Utc::now(),
            is_read: false,
        }
    }

    pub fn server_id(&self) -> Option<MessageId> {
        match &self.state {
            DeliveryState::Confirmed { server_id } => Some(*server_id),
            DeliveryState::Pending { .. } => None,
        }
    }

    pub fn local_id(&self) -> Option<&LocalId> {
        match &self.state {
            DeliveryState::Pending { local_id } => Some(local_id),
            DeliveryState::Confirmed { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DeliveryState::Pending { .. })
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        Self {
            state: DeliveryState::Confirmed {
                server_id: message.id,
            },
            conversation_id: message.conversation_id,
            sender: message.sender,
            content: message.content,
            timestamp: message.timestamp,
            is_read: message.is_read,
        }
    }
}

/// `replace` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// 待确认记录被原位替换为确认记录
    Replaced,
    /// 确认记录已存在（例如实时回显先到），待确认记录被移除
    Absorbed,
    /// 没有该本地 ID 的待确认记录
    NotFound,
}

/// 单个会话的有序消息存储
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    records: Vec<MessageRecord>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加记录，服务端 ID 或本地 ID 已存在时不做任何修改
    ///
    /// 返回是否实际追加。
    pub fn append(&mut self, record: MessageRecord) -> bool {
        let exists = match &record.state {
            DeliveryState::Confirmed { server_id } => self.contains_server_id(*server_id),
            DeliveryState::Pending { local_id } => self.position_of_pending(local_id).is_some(),
        };
        if exists {
            return false;
        }
        self.records.push(record);
        true
    }

    /// 用确认记录替换指定本地 ID 的待确认记录
    pub fn replace(&mut self, local_id: &LocalId, record: MessageRecord) -> ReplaceOutcome {
        let Some(position) = self.position_of_pending(local_id) else {
            return ReplaceOutcome::NotFound;
        };

        let duplicate = record
            .server_id()
            .map(|id| self.contains_server_id(id))
            .unwrap_or(false);
        if duplicate {
            self.records.remove(position);
            return ReplaceOutcome::Absorbed;
        }

        self.records[position] = record;
        ReplaceOutcome::Replaced
    }

    /// 移除指定本地 ID 的待确认记录
    pub fn remove_pending(&mut self, local_id: &LocalId) -> Option<MessageRecord> {
        self.position_of_pending(local_id)
            .map(|position| self.records.remove(position))
    }

    /// 查找可与本人回显匹配的待确认记录（最早插入且内容相同）
    pub fn find_pending_for_echo(&self, sender: &User, content: &str) -> Option<LocalId> {
        self.records
            .iter()
            .find(|record| record.is_pending() && record.sender.id == sender.id && record.content == content)
            .and_then(|record| record.local_id().cloned())
    }

    pub fn contains_server_id(&self, server_id: MessageId) -> bool {
        self.records
            .iter()
            .any(|record| record.server_id() == Some(server_id))
    }

    pub fn contains_pending(&self, local_id: &LocalId) -> bool {
        self.position_of_pending(local_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.records.iter().filter(|record| record.is_pending()).count()
    }

    /// 按插入顺序返回全部记录
    pub fn list(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position_of_pending(&self, local_id: &LocalId) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.local_id() == Some(local_id))
    }
}
