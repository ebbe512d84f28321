use std::collections::HashSet;

use unimarket_chat::model::{Conversation, UserId};
use unimarket_chat::session::Notice;
use unimarket_chat::{DeliveryState, MessageRecord, NoticeSeverity, SessionPhase};

/// 把通知渲染成终端输出行
///
/// 消息列表通知每次携带完整列表，这里只输出尚未打印过的记录。
pub struct ConsoleView {
    local_user: UserId,
    printed: HashSet<String>,
    /// 已打印、尚未确认的自己发送的内容
    sending: Vec<String>,
}

impl ConsoleView {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            printed: HashSet::new(),
            sending: Vec::new(),
        }
    }

    pub fn render(&mut self, notice: &Notice) -> Vec<String> {
        match notice {
            Notice::PhaseChanged(phase) => vec![self.render_phase(phase)],
            Notice::MessagesChanged(records) => self.render_messages(records),
            Notice::Conversations(conversations) => self.render_conversations(conversations),
            Notice::ConversationRedirected { existing_id } => {
                vec![format!("Conversation already exists, opening #{existing_id}")]
            }
            Notice::UnreadCount(count) => vec![format!("Unread messages: {count}")],
            Notice::Connection(status) => vec![format!("-- {status}")],
            Notice::Error(notice) => {
                let tag = match notice.severity {
                    NoticeSeverity::Transient => "warn",
                    NoticeSeverity::Error => "error",
                    NoticeSeverity::Fatal => "fatal",
                };
                vec![format!("[{tag}] {}: {}", notice.title, notice.description)]
            }
            Notice::SessionExpired => {
                vec!["Session expired, sign in again to keep chatting.".to_string()]
            }
        }
    }

    fn render_phase(&mut self, phase: &SessionPhase) -> String {
        match phase {
            SessionPhase::Idle => {
                self.printed.clear();
                self.sending.clear();
                "No conversation open".to_string()
            }
            SessionPhase::Loading {
                conversation_id, ..
            } => {
                self.printed.clear();
                self.sending.clear();
                format!("Loading conversation #{conversation_id}...")
            }
            SessionPhase::Active { conversation_id } => {
                format!("Conversation #{conversation_id} open")
            }
        }
    }

    fn render_messages(&mut self, records: &[MessageRecord]) -> Vec<String> {
        let mut lines = Vec::new();
        for record in records {
            let key = match &record.state {
                DeliveryState::Pending { local_id } => format!("local:{local_id}"),
                DeliveryState::Confirmed { server_id } => format!("server:{server_id}"),
            };
            if !self.printed.insert(key) {
                continue;
            }
            let own = record.sender.id == self.local_user;
            if record.is_pending() {
                self.sending.push(record.content.clone());
            } else if own {
                // 已以发送中状态打印过
                if let Some(pos) = self.sending.iter().position(|c| *c == record.content) {
                    self.sending.remove(pos);
                    continue;
                }
            }
            let who = if own {
                "me".to_string()
            } else {
                record.sender.display_name()
            };
            let marker = if record.is_pending() { " (sending)" } else { "" };
            lines.push(format!(
                "[{}] {who}: {}{marker}",
                record.timestamp.format("%H:%M"),
                record.content
            ));
        }
        // 发送失败被撤回的记录
        self.sending.retain(|content| {
            records
                .iter()
                .any(|r| r.is_pending() && r.content == *content)
        });
        lines
    }

    fn render_conversations(&self, conversations: &[Conversation]) -> Vec<String> {
        if conversations.is_empty() {
            return vec!["No conversations yet".to_string()];
        }
        conversations
            .iter()
            .map(|conversation| {
                let counterpart = conversation
                    .counterpart(self.local_user)
                    .map(|user| user.display_name())
                    .unwrap_or_else(|| "unknown".to_string());
                let product = conversation
                    .product
                    .as_ref()
                    .and_then(|product| product.title.as_deref())
                    .map(|title| format!(" [{title}]"))
                    .unwrap_or_default();
                let unread = if conversation.unread_count > 0 {
                    format!(" ({} unread)", conversation.unread_count)
                } else {
                    String::new()
                };
                let last = conversation
                    .last_message
                    .as_ref()
                    .map(|m| format!(": {}", m.content))
                    .unwrap_or_default();
                format!("#{} {counterpart}{product}{unread}{last}", conversation.id)
            })
            .collect()
    }
}
