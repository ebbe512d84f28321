//! 聊天领域模型
//!
//! 与后端 REST 序列化格式和实时事件负载保持一致。

mod conversation;
mod ids;
mod message;
mod user;

pub use conversation::{Conversation, MessageSummary, ProductRef};
pub use ids::{
    ConversationId, LOCAL_ID_PREFIX, LocalId, LocalIdGenerator, MessageId, ProductId, UserId,
};
pub use message::{Message, NewMessage};
pub use user::User;
