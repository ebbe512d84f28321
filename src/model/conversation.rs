use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, Message, MessageId, ProductId, User, UserId};

/// 会话摘要中的商品信息（只取展示需要的字段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: ProductId,
    #[serde(default)]
    pub title: Option<String>,
}

/// 会话列表中的最后一条消息摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: MessageId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: UserId,
    #[serde(default)]
    pub is_read: bool,
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            content: message.content.clone(),
            timestamp: message.timestamp,
            sender_id: message.sender.id,
            is_read: message.is_read,
        }
    }
}

/// 会话（两名参与者之间，客户端从不删除）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub participants: Vec<User>,
    #[serde(default)]
    pub product: Option<ProductRef>,
    #[serde(default)]
    pub last_message: Option<MessageSummary>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// 除本地用户以外的参与者
    pub fn counterpart(&self, local_user: UserId) -> Option<&User> {
        self.participants.iter().find(|user| user.id != local_user)
    }

    /// 新消息落地后更新摘要
    pub fn touch(&mut self, message: &Message) {
        let newer = self
            .last_message
            .as_ref()
            .map(|last| last.id != message.id && last.timestamp <= message.timestamp)
            .unwrap_or(true);
        if newer {
            self.last_message = Some(MessageSummary::from(message));
            self.updated_at = Some(message.timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_conversation_with_nested_product() {
        let payload = json!({
            "id": 42,
            "participants": [
                {"id": 7, "first_name": "Ada", "last_name": "L"},
                {"id": 8, "first_name": "Bob", "last_name": "K"}
            ],
            "product": {"id": 5, "title": "Calculus textbook", "price": "12.00"},
            "created_at": "2025-03-01T09:00:00Z",
            "updated_at": "2025-03-01T10:00:00Z",
            "last_message": {
                "id": 99,
                "content": "hello",
                "timestamp": "2025-03-01T10:00:00Z",
                "sender_id": 7,
                "is_read": false
            },
            "unread_count": 1
        });
        let conversation: Conversation = serde_json::from_value(payload).unwrap();
        assert_eq!(conversation.counterpart(UserId(7)).unwrap().id, UserId(8));
        assert_eq!(conversation.product.unwrap().id, ProductId(5));
        assert_eq!(conversation.last_message.unwrap().id, MessageId(99));
    }

    #[test]
    fn touch_keeps_the_newest_summary() {
        let mut conversation: Conversation =
            serde_json::from_value(json!({"id": 1, "participants": []})).unwrap();
        let sender = User::new(7, "Ada", "L");
        let later = Message {
            id: MessageId(2),
            conversation_id: ConversationId(1),
            sender: sender.clone(),
            content: "second".into(),
            timestamp: "2025-03-01T10:01:00Z".parse().unwrap(),
            is_read: false,
            is_edited: false,
        };
        let earlier = Message {
            id: MessageId(1),
            content: "first".into(),
            timestamp: "2025-03-01T10:00:00Z".parse().unwrap(),
            ..later.clone()
        };

        conversation.touch(&later);
        conversation.touch(&earlier);
        assert_eq!(conversation.last_message.unwrap().content, "second");
    }
}
