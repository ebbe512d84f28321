//! 聊天 REST API 客户端契约
//!
//! 会话层只依赖 [`ChatApi`]，具体实现见 [`HttpChatApi`]。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatResult;
use crate::model::{Conversation, ConversationId, Message, NewMessage, ProductId, UserId};

mod http;

pub use http::HttpChatApi;

/// 列表响应：后端可能返回裸数组，也可能返回分页对象
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Page<T> {
    Plain(Vec<T>),
    Paginated {
        results: Vec<T>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        count: Option<u64>,
    },
}

impl<T> Page<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Plain(items) => items,
            Self::Paginated { results, .. } => results,
        }
    }

    pub fn has_next(&self) -> bool {
        matches!(self, Self::Paginated { next: Some(_), .. })
    }
}

/// 发起会话请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartConversation {
    pub seller_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
}

/// 未读数响应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UnreadCount {
    pub unread_count: u64,
}

/// 聊天 API
///
/// 所有调用都带有超时，超时返回 [`ChatError::Timeout`](crate::error::ChatError::Timeout)。
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// 当前用户的会话列表
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>>;

    /// 会话历史，按时间正序；`page` 为空时取第一页
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: Option<u32>,
    ) -> ChatResult<Vec<Message>>;

    /// 创建消息，返回服务端确认的记录
    async fn create_message(&self, message: NewMessage) -> ChatResult<Message>;

    /// 发起会话；已存在时返回 `DuplicateConversation`，携带已有会话 ID
    async fn start_conversation(&self, request: StartConversation) -> ChatResult<Conversation>;

    /// 标记会话消息为已读
    async fn mark_read(&self, conversation_id: ConversationId) -> ChatResult<()>;

    /// 未读消息总数
    async fn unread_count(&self) -> ChatResult<u64>;
}
