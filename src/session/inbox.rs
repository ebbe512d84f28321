//! 会话列表
//!
//! 保存最近一次拉取的会话列表；新消息到达时更新摘要并移到最前。

use crate::model::{Conversation, ConversationId, Message};

#[derive(Debug, Default, Clone)]
pub struct Inbox {
    conversations: Vec<Conversation>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
    }

    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    /// 插入或替换会话，并移到最前
    pub fn upsert(&mut self, conversation: Conversation) {
        self.conversations.retain(|c| c.id != conversation.id);
        self.conversations.insert(0, conversation);
    }

    /// 记录新消息，会话不在列表中时返回 false
    pub fn record_message(&mut self, message: &Message) -> bool {
        let Some(position) = self
            .conversations
            .iter()
            .position(|c| c.id == message.conversation_id)
        else {
            return false;
        };

        let mut conversation = self.conversations.remove(position);
        conversation.touch(message);
        self.conversations.insert(0, conversation);
        true
    }

    /// 清零未读数，返回是否有变化
    pub fn mark_read(&mut self, conversation_id: ConversationId) -> bool {
        match self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            Some(conversation) if conversation.unread_count > 0 => {
                conversation.unread_count = 0;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageId, User};
    use serde_json::json;

    fn conversation(id: i64, unread: u32) -> Conversation {
        serde_json::from_value(json!({"id": id, "participants": [], "unread_count": unread}))
            .unwrap()
    }

    #[test]
    fn new_message_moves_conversation_to_front() {
        let mut inbox = Inbox::new();
        inbox.replace_all(vec![conversation(1, 0), conversation(2, 0)]);

        let message = Message {
            id: MessageId(10),
            conversation_id: ConversationId(2),
            sender: User::new(7, "Ada", "L"),
            content: "hi".into(),
            timestamp: chrono::Utc::now(),
            is_read: false,
            is_edited: false,
        };
        assert!(inbox.record_message(&message));
        assert_eq!(inbox.list()[0].id, ConversationId(2));
        assert_eq!(
            inbox.list()[0].last_message.as_ref().unwrap().content,
            "hi"
        );
    }

    #[test]
    fn mark_read_reports_changes_only() {
        let mut inbox = Inbox::new();
        inbox.replace_all(vec![conversation(1, 3)]);
        assert!(inbox.mark_read(ConversationId(1)));
        assert!(!inbox.mark_read(ConversationId(1)));
        assert!(!inbox.mark_read(ConversationId(9)));
    }
}
