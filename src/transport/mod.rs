//! 实时传输适配层
//!
//! 会话只依赖 [`Transport`] trait，不持有全局连接：
//! - [`ChannelSocketTransport`]：基于 websocket 的托管推送服务实现
//! - [`InMemoryTransport`]：进程内实现，用于测试和离线演示
//!
//! 每个订阅的每个事件名只有一个处理器，处理器是一个有界信箱（`mpsc::Sender`），
//! 重复注册会替换旧处理器。

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::ChatResult;
use crate::model::ConversationId;

mod memory;
pub mod protocol;
mod socket;

pub use memory::InMemoryTransport;
pub use socket::ChannelSocketTransport;

/// 新消息事件名
pub const NEW_MESSAGE_EVENT: &str = "new-message";

/// 会话主题名 `conversation-<id>`
pub fn conversation_topic(conversation_id: ConversationId) -> String {
    format!("conversation-{conversation_id}")
}

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

/// 出站事件
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub event: String,
    pub payload: Value,
}

/// 事件处理器：订阅对应的有界信箱
pub type EventHandler = mpsc::Sender<TransportEvent>;

/// 连接状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected { socket_id: String },
    Reconnecting { attempt: u32 },
    /// 已主动关闭，或重连次数耗尽
    Closed,
    /// 重连时凭证被拒且刷新失败，不再重连
    Expired,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected { socket_id } => write!(f, "connected ({socket_id})"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Closed => f.write_str("closed"),
            Self::Expired => f.write_str("credentials expired"),
        }
    }
}

/// 连接建立后的信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub socket_id: String,
}

/// 订阅句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    /// 服务商侧的频道名
    pub channel: String,
}

/// 实时传输
#[async_trait]
pub trait Transport: Send + Sync {
    /// 建立连接；已连接时直接返回当前连接信息
    async fn connect(&self, auth_token: &str) -> ChatResult<ConnectionInfo>;

    /// 订阅主题，非会话参与者时返回授权错误
    async fn subscribe(&self, topic: &str) -> ChatResult<Subscription>;

    /// 取消订阅，未订阅时为空操作
    async fn unsubscribe(&self, topic: &str) -> ChatResult<()>;

    /// 注册事件处理器，替换同一主题同一事件名上的旧处理器
    fn on_event(&self, topic: &str, event: &str, handler: EventHandler);

    /// 移除事件处理器
    fn off_event(&self, topic: &str, event: &str);

    /// 在已订阅的主题上发送客户端事件
    async fn send(&self, topic: &str, event: OutboundEvent) -> ChatResult<()>;

    /// 连接状态订阅
    fn status(&self) -> watch::Receiver<ConnectionStatus>;

    /// 关闭连接并停止重连
    async fn close(&self);
}

/// 重连退避：`base * 2^(attempt-1)`，不超过上限，再叠加至多 25% 的随机抖动
pub(crate) fn backoff_delay(
    attempt: u32,
    base: std::time::Duration,
    max: std::time::Duration,
) -> std::time::Duration {
    use rand::Rng;

    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << exponent).min(max);
    let jitter_ceiling = (delay.as_millis() as u64) / 4;
    let jitter = if jitter_ceiling == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ceiling)
    };
    (delay + std::time::Duration::from_millis(jitter)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn topic_name_uses_conversation_id() {
        assert_eq!(conversation_topic(ConversationId(42)), "conversation-42");
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1_000);
        let first = backoff_delay(1, base, max);
        assert!(first >= base && first <= Duration::from_millis(125));
        let third = backoff_delay(3, base, max);
        assert!(third >= Duration::from_millis(400));
        for attempt in 5..40 {
            assert!(backoff_delay(attempt, base, max) <= max);
        }
    }
}
