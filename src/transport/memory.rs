//! 进程内传输实现
//!
//! 行为与 websocket 实现一致（单处理器、断线后恢复订阅），
//! 并提供发布、断线、恢复、拒绝授权等控制接口。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::{
    ConnectionInfo, ConnectionStatus, EventHandler, OutboundEvent, Subscription, Transport,
    TransportEvent,
};
use crate::error::{ChatError, ChatResult};

#[derive(Default)]
struct State {
    connected: bool,
    connection_seq: u64,
    /// 期望保持的订阅
    topics: HashSet<String>,
    /// 当前连接上生效的订阅
    live: HashSet<String>,
    denied: HashSet<String>,
    rejected_tokens: HashSet<String>,
    handlers: HashMap<(String, String), EventHandler>,
    sent: Vec<(String, OutboundEvent)>,
    subscribe_calls: Vec<String>,
    unsubscribe_calls: Vec<String>,
    held: Option<oneshot::Receiver<()>>,
}

/// 进程内传输
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            status: Arc::new(status),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 向主题发布事件，返回是否投递到处理器
    pub fn publish(&self, topic: &str, event: &str, payload: Value) -> bool {
        let handler = {
            let state = self.state();
            if !state.connected || !state.live.contains(topic) {
                return false;
            }
            state
                .handlers
                .get(&(topic.to_string(), event.to_string()))
                .cloned()
        };

        let Some(handler) = handler else {
            return false;
        };
        match handler.try_send(TransportEvent {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic = %topic, event = %event, "Mailbox full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 模拟断线：订阅失效，但期望订阅保留
    pub fn drop_connection(&self) {
        {
            let mut state = self.state();
            state.connected = false;
            state.live.clear();
        }
        self.status
            .send_replace(ConnectionStatus::Reconnecting { attempt: 1 });
    }

    /// 模拟重连成功：恢复全部期望订阅后发布 `Connected`
    pub fn restore_connection(&self) {
        let socket_id = {
            let mut state = self.state();
            state.connected = true;
            state.connection_seq += 1;
            let restored: Vec<String> = state
                .topics
                .iter()
                .filter(|topic| !state.denied.contains(*topic))
                .cloned()
                .collect();
            state.live.extend(restored);
            format!("memory.{}", state.connection_seq)
        };
        self.status
            .send_replace(ConnectionStatus::Connected { socket_id });
    }

    /// 模拟重连时凭证失效
    pub fn expire_credentials(&self) {
        {
            let mut state = self.state();
            state.connected = false;
            state.live.clear();
        }
        self.status.send_replace(ConnectionStatus::Expired);
    }

    /// 挂起下一次订阅，直到返回的发送端被触发或丢弃
    pub fn hold_next_subscription(&self) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        self.state().held = Some(held);
        release
    }

    /// 拒绝对该主题的订阅（非参与者）
    pub fn deny(&self, topic: &str) {
        self.state().denied.insert(topic.to_string());
    }

    /// 拒绝该令牌的连接
    pub fn reject_token(&self, token: &str) {
        self.state().rejected_tokens.insert(token.to_string());
    }

    /// 当前生效的订阅
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.state().live.iter().cloned().collect();
        topics.sort();
        topics
    }

    /// 已注册处理器数量
    pub fn handler_count(&self, topic: &str) -> usize {
        self.state()
            .handlers
            .keys()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// 调用过 subscribe 的主题，按调用顺序
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.state().subscribe_calls.clone()
    }

    /// 调用过 unsubscribe 的主题，按调用顺序
    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.state().unsubscribe_calls.clone()
    }

    /// 已发送的客户端事件
    pub fn sent_events(&self) -> Vec<(String, OutboundEvent)> {
        self.state().sent.clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self, auth_token: &str) -> ChatResult<ConnectionInfo> {
        let socket_id = {
            let mut state = self.state();
            if state.rejected_tokens.contains(auth_token) {
                return Err(ChatError::authorization("token rejected"));
            }
            if !state.connected {
                state.connected = true;
                state.connection_seq += 1;
            }
            format!("memory.{}", state.connection_seq)
        };
        if !self.status.borrow().is_connected() {
            self.status.send_replace(ConnectionStatus::Connected {
                socket_id: socket_id.clone(),
            });
        }
        Ok(ConnectionInfo { socket_id })
    }

    async fn subscribe(&self, topic: &str) -> ChatResult<Subscription> {
        let held = self.state().held.take();
        if let Some(held) = held {
            let _ = held.await;
        }

        let mut state = self.state();
        state.subscribe_calls.push(topic.to_string());
        if state.denied.contains(topic) {
            return Err(ChatError::authorization(format!("not a participant of {topic}")));
        }
        state.topics.insert(topic.to_string());
        if !state.connected {
            return Err(ChatError::Connection("not connected".into()));
        }
        state.live.insert(topic.to_string());
        debug!(topic = %topic, "Subscribed (memory)");
        Ok(Subscription {
            topic: topic.to_string(),
            channel: topic.to_string(),
        })
    }

    async fn unsubscribe(&self, topic: &str) -> ChatResult<()> {
        let mut state = self.state();
        if !state.topics.remove(topic) {
            return Ok(());
        }
        state.unsubscribe_calls.push(topic.to_string());
        state.live.remove(topic);
        state.handlers.retain(|(t, _), _| t != topic);
        Ok(())
    }

    fn on_event(&self, topic: &str, event: &str, handler: EventHandler) {
        self.state()
            .handlers
            .insert((topic.to_string(), event.to_string()), handler);
    }

    fn off_event(&self, topic: &str, event: &str) {
        self.state()
            .handlers
            .remove(&(topic.to_string(), event.to_string()));
    }

    async fn send(&self, topic: &str, event: OutboundEvent) -> ChatResult<()> {
        let mut state = self.state();
        if !state.connected || !state.live.contains(topic) {
            return Err(ChatError::Connection(format!("not subscribed to {topic}")));
        }
        state.sent.push((topic.to_string(), event));
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    async fn close(&self) {
        {
            let mut state = self.state();
            state.connected = false;
            state.topics.clear();
            state.live.clear();
            state.handlers.clear();
        }
        self.status.send_replace(ConnectionStatus::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn handler_registration_replaces_previous() {
        let transport = InMemoryTransport::new();
        transport.connect("token").await.unwrap();
        transport.subscribe("conversation-1").await.unwrap();

        let (first_tx, mut first_rx) = mpsc::channel(4);
        let (second_tx, mut second_rx) = mpsc::channel(4);
        transport.on_event("conversation-1", "new-message", first_tx);
        transport.on_event("conversation-1", "new-message", second_tx);
        assert_eq!(transport.handler_count("conversation-1"), 1);

        assert!(transport.publish("conversation-1", "new-message", json!({"id": 1})));
        assert!(second_rx.try_recv().is_ok());
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_noop_when_not_subscribed() {
        let transport = InMemoryTransport::new();
        transport.connect("token").await.unwrap();
        transport.unsubscribe("conversation-9").await.unwrap();
        assert!(transport.unsubscribe_calls().is_empty());
    }

    #[tokio::test]
    async fn restore_resubscribes_remembered_topics() {
        let transport = InMemoryTransport::new();
        transport.connect("token").await.unwrap();
        transport.subscribe("conversation-1").await.unwrap();

        transport.drop_connection();
        assert!(transport.subscribed_topics().is_empty());
        assert!(!transport.publish("conversation-1", "new-message", json!({})));

        transport.restore_connection();
        assert_eq!(transport.subscribed_topics(), vec!["conversation-1".to_string()]);
    }

    #[tokio::test]
    async fn denied_topic_is_an_authorization_error() {
        let transport = InMemoryTransport::new();
        transport.connect("token").await.unwrap();
        transport.deny("conversation-2");
        let err = transport.subscribe("conversation-2").await.unwrap_err();
        assert!(matches!(err, ChatError::Authorization { .. }));
        assert!(transport.subscribed_topics().is_empty());
    }
}
