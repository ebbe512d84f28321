#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use unimarket_chat::api::{ChatApi, StartConversation};
use unimarket_chat::model::{Conversation, ConversationId, Message, MessageId, NewMessage, User};
use unimarket_chat::session::{Notice, SessionSnapshot};
use unimarket_chat::{ChatClient, ChatError, ChatResult, CredentialProvider};

pub mod http_stub;

pub fn me() -> User {
    User::new(7, "Ada", "Lovelace")
}

pub fn seller() -> User {
    User::new(8, "Bob", "Seller")
}

pub fn message(id: i64, conversation: i64, sender: &User, content: &str) -> Message {
    Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation),
        sender: sender.clone(),
        content: content.to_string(),
        timestamp: Utc::now(),
        is_read: false,
        is_edited: false,
    }
}

pub fn conversation(id: i64) -> Conversation {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "participants": [
            {"id": 7, "first_name": "Ada", "last_name": "Lovelace"},
            {"id": 8, "first_name": "Bob", "last_name": "Seller"}
        ],
        "unread_count": 1
    }))
    .unwrap()
}

type Gate<T> = oneshot::Receiver<ChatResult<T>>;

/// 可编排的聊天 API
#[derive(Default)]
pub struct ScriptedApi {
    histories: Mutex<HashMap<ConversationId, Vec<Message>>>,
    history_gates: Mutex<HashMap<ConversationId, VecDeque<Gate<Vec<Message>>>>>,
    create_results: Mutex<VecDeque<ChatResult<Message>>>,
    create_gates: Mutex<VecDeque<Gate<Message>>>,
    start_results: Mutex<VecDeque<ChatResult<Conversation>>>,
    conversations: Mutex<Vec<Conversation>>,
    created: Mutex<Vec<NewMessage>>,
    history_calls: Mutex<Vec<ConversationId>>,
    marked_read: Mutex<Vec<ConversationId>>,
    next_id: AtomicI64,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1000),
            ..Self::default()
        })
    }

    pub fn set_history(&self, conversation: i64, messages: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(ConversationId(conversation), messages);
    }

    /// 下一次拉取该会话历史时阻塞，直到返回的 sender 被触发
    pub fn gate_history(&self, conversation: i64) -> oneshot::Sender<ChatResult<Vec<Message>>> {
        let (tx, rx) = oneshot::channel();
        self.history_gates
            .lock()
            .unwrap()
            .entry(ConversationId(conversation))
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn fail_next_create(&self, err: ChatError) {
        self.create_results.lock().unwrap().push_back(Err(err));
    }

    pub fn gate_create(&self) -> oneshot::Sender<ChatResult<Message>> {
        let (tx, rx) = oneshot::channel();
        self.create_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn script_start(&self, result: ChatResult<Conversation>) {
        self.start_results.lock().unwrap().push_back(result);
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn created(&self) -> Vec<NewMessage> {
        self.created.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> Vec<ConversationId> {
        self.history_calls.lock().unwrap().clone()
    }

    pub fn marked_read(&self) -> Vec<ConversationId> {
        self.marked_read.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for ScriptedApi {
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>> {
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        _page: Option<u32>,
    ) -> ChatResult<Vec<Message>> {
        self.history_calls.lock().unwrap().push(conversation_id);
        let gate = self
            .history_gates
            .lock()
            .unwrap()
            .get_mut(&conversation_id)
            .and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            return gate.await.unwrap_or(Err(ChatError::Connection("gate dropped".into())));
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_message(&self, new_message: NewMessage) -> ChatResult<Message> {
        self.created.lock().unwrap().push(new_message.clone());
        let gate = self.create_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            return gate.await.unwrap_or(Err(ChatError::Connection("gate dropped".into())));
        }
        let scripted = self.create_results.lock().unwrap().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(message(
            id,
            new_message.conversation.0,
            &me(),
            &new_message.content,
        ))
    }

    async fn start_conversation(&self, request: StartConversation) -> ChatResult<Conversation> {
        let scripted = self.start_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(conversation(request.seller_id.0 * 100)))
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> ChatResult<()> {
        self.marked_read.lock().unwrap().push(conversation_id);
        Ok(())
    }

    async fn unread_count(&self) -> ChatResult<u64> {
        Ok(3)
    }
}

/// 轮询快照直到条件满足
pub async fn wait_for(
    client: &ChatClient,
    condition: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = client.snapshot().await.expect("client should be running");
        if condition(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached, last snapshot: {snapshot:#?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 取出当前已到达的全部通知
pub fn drain(notices: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut drained = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        drained.push(notice);
    }
    drained
}

pub fn server_ids(snapshot: &SessionSnapshot) -> Vec<i64> {
    snapshot
        .messages
        .iter()
        .filter_map(|r| r.server_id().map(|id| id.0))
        .collect()
}

/// 令牌被拒后刷新为 `next`；`next` 为空时刷新失败
pub struct ScriptedCredentials {
    current: Mutex<String>,
    next: Option<String>,
    refreshes: AtomicU32,
}

impl ScriptedCredentials {
    pub fn new(current: &str, next: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(current.to_string()),
            next: next.map(str::to_string),
            refreshes: AtomicU32::new(0),
        })
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for ScriptedCredentials {
    async fn access_token(&self) -> ChatResult<String> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn refresh(&self, _rejected: &str) -> ChatResult<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let next = self
            .next
            .clone()
            .ok_or_else(|| ChatError::session_expired("refresh token rejected"))?;
        *self.current.lock().unwrap() = next.clone();
        Ok(next)
    }
}
