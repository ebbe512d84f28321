use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, User};

/// 服务端确认的消息记录
///
/// 同一结构同时用于历史分页、创建消息的响应和实时 `new-message` 事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// 后端序列化器使用 `conversation`，实时事件使用 `conversation_id`
    #[serde(alias = "conversation")]
    pub conversation_id: ConversationId,
    pub sender: User,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_edited: bool,
}

/// 创建消息请求体（`POST chat/messages/create/`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub conversation: ConversationId,
    pub content: String,
}
