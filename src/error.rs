//! 聊天子系统错误类型
//!
//! - 连接错误由重连循环吸收，只产生瞬时提示
//! - 授权错误在刷新凭证一次后仍失败即为致命
//! - 历史加载 / 发送失败会回滚本地状态并提示一次

use std::time::Duration;

use thiserror::Error;

use crate::model::{ConversationId, LocalId};

/// 聊天子系统错误
#[derive(Debug, Error)]
pub enum ChatError {
    /// 连接失败（凭证被拒或网络不可达）
    #[error("Connection error: {0}")]
    Connection(String),

    /// 授权失败
    #[error("Authorization error: {message}")]
    Authorization {
        message: String,
        /// 凭证刷新后依然被拒绝
        session_expired: bool,
    },

    /// 历史消息加载失败
    #[error("Failed to load history for conversation {conversation_id}")]
    HistoryFetch {
        conversation_id: ConversationId,
        #[source]
        source: Box<ChatError>,
    },

    /// 消息发送失败
    #[error("Failed to send message {local_id}")]
    Send {
        local_id: LocalId,
        #[source]
        source: Box<ChatError>,
    },

    /// 会话已存在
    #[error("Conversation already exists: {existing_id}")]
    DuplicateConversation { existing_id: ConversationId },

    /// 请求超时
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// 非预期的 HTTP 状态
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// 响应或事件负载无法解析
    #[error("Decode error: {0}")]
    Decode(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 会话已关闭
    #[error("Chat session closed")]
    SessionClosed,

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 聊天子系统结果类型
pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
            session_expired: false,
        }
    }

    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
            session_expired: true,
        }
    }

    pub fn history(conversation_id: ConversationId, source: ChatError) -> Self {
        Self::HistoryFetch {
            conversation_id,
            source: Box::new(source),
        }
    }

    pub fn send(local_id: LocalId, source: ChatError) -> Self {
        Self::Send {
            local_id,
            source: Box::new(source),
        }
    }

    /// 凭证已失效，需要重新登录
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Authorization {
                session_expired, ..
            } => *session_expired,
            Self::HistoryFetch { source, .. } | Self::Send { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// 可由重连 / 重试自行恢复的错误
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 最底层的错误原因
    pub fn root(&self) -> &ChatError {
        match self {
            Self::HistoryFetch { source, .. } | Self::Send { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// 提示级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    /// 可自行恢复，界面上短暂提示
    Transient,
    /// 非致命错误，提示一次
    Error,
    /// 会话失效，需要重新登录
    Fatal,
}

/// 面向用户的非阻塞提示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub severity: NoticeSeverity,
    pub title: String,
    pub description: String,
}

impl From<&ChatError> for UserNotice {
    fn from(err: &ChatError) -> Self {
        let severity = if err.is_fatal() {
            NoticeSeverity::Fatal
        } else if err.root().is_transient() {
            NoticeSeverity::Transient
        } else {
            NoticeSeverity::Error
        };

        let title = match err {
            ChatError::Connection(_) => "Connection lost",
            ChatError::Authorization { .. } if err.is_fatal() => "Session expired",
            ChatError::Authorization { .. } => "Not allowed",
            ChatError::HistoryFetch { .. } => "Failed to load messages",
            ChatError::Send { .. } => "Failed to send message",
            ChatError::DuplicateConversation { .. } => "Conversation already exists",
            ChatError::Timeout(_) => "Request timed out",
            _ => "Error",
        };

        let description = match err {
            ChatError::HistoryFetch { source, .. } | ChatError::Send { source, .. } => {
                source.to_string()
            }
            other => other.to_string(),
        };

        Self {
            severity,
            title: title.to_string(),
            description,
        }
    }
}
