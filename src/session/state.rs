//! 会话状态机
//!
//! 纯状态，不做 I/O：每个方法返回驱动层需要执行的动作（取消订阅、拉取历史、订阅）。
//! 所有异步结果都带有发起时的票据，票据过期的结果直接丢弃。

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::model::{ConversationId, LocalId, LocalIdGenerator, Message, MessageId, User};
use crate::store::{MessageRecord, MessageStore, ReplaceOutcome};
use crate::transport::{NEW_MESSAGE_EVENT, TransportEvent, conversation_topic};

/// 历史拉取票据，绑定发起时的会话
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryTicket {
    pub conversation_id: ConversationId,
    seq: u64,
}

/// 会话阶段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading {
        conversation_id: ConversationId,
        ticket: HistoryTicket,
    },
    Active {
        conversation_id: ConversationId,
    },
}

/// 切换会话时驱动层要执行的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectPlan {
    /// 需要先取消订阅的旧主题
    pub leave: Option<String>,
    /// 新会话的历史拉取票据
    pub ticket: HistoryTicket,
}

/// 历史拉取结果的处理结论
#[derive(Debug)]
pub enum HistoryOutcome {
    /// 会话已切换，结果被丢弃
    Stale,
    /// 会话进入 Active，需要订阅 `subscribe`；拉取失败时附带错误
    Ready {
        subscribe: String,
        error: Option<ChatError>,
    },
}

/// 重新同步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    Stale,
    /// 合并后新增或完成对账的记录数
    Merged(usize),
}

/// 一次乐观发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub local_id: LocalId,
    pub conversation_id: ConversationId,
    pub content: String,
}

/// 入站事件处理结论
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// 新记录追加到末尾
    Appended(Message),
    /// 本人回显与待确认记录完成对账
    Reconciled { local_id: LocalId, message: Message },
    /// 服务端 ID 已存在
    Duplicate,
    /// 非当前会话、非 `new-message` 或会话未激活
    Ignored,
}

impl InboundOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Appended(_) => "appended",
            Self::Reconciled { .. } => "reconciled",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
        }
    }
}

/// 发送完成的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 待确认记录原位替换
    Confirmed,
    /// 回显已先到达，待确认记录被合并
    Absorbed,
    /// 待确认记录已被回显对账，响应无需再处理
    AlreadyConfirmed,
    /// 待确认记录已不存在且服务端记录缺失，补追加
    AppendedLate,
    /// 会话已切换
    Discarded,
}

/// 当前打开的会话
#[derive(Debug)]
pub struct ConversationSession {
    local_user: User,
    phase: SessionPhase,
    store: MessageStore,
    ids: LocalIdGenerator,
    subscribed: Option<String>,
    /// 当前订阅对应的历史票据
    attached: Option<HistoryTicket>,
    resync: Option<HistoryTicket>,
    /// 被回显对账的待确认记录
    echoed: HashMap<LocalId, MessageId>,
    next_seq: u64,
}

impl ConversationSession {
    pub fn new(local_user: User) -> Self {
        Self {
            local_user,
            phase: SessionPhase::Idle,
            store: MessageStore::new(),
            ids: LocalIdGenerator::new(),
            subscribed: None,
            attached: None,
            resync: None,
            echoed: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn local_user(&self) -> &User {
        &self.local_user
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// 当前订阅的主题
    pub fn subscribed_topic(&self) -> Option<&str> {
        self.subscribed.as_deref()
    }

    /// 订阅结果是否仍属于当前打开的会话
    pub fn is_attached(&self, ticket: HistoryTicket) -> bool {
        self.attached == Some(ticket)
    }

    /// Loading 或 Active 的会话
    pub fn current_conversation(&self) -> Option<ConversationId> {
        match &self.phase {
            SessionPhase::Idle => None,
            SessionPhase::Loading {
                conversation_id, ..
            }
            | SessionPhase::Active { conversation_id } => Some(*conversation_id),
        }
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        match &self.phase {
            SessionPhase::Active { conversation_id } => Some(*conversation_id),
            _ => None,
        }
    }

    fn ticket(&mut self, conversation_id: ConversationId) -> HistoryTicket {
        self.next_seq += 1;
        HistoryTicket {
            conversation_id,
            seq: self.next_seq,
        }
    }

    /// 切换会话；目标即当前会话时返回 None
    pub fn select_conversation(&mut self, conversation_id: ConversationId) -> Option<SelectPlan> {
        if self.current_conversation() == Some(conversation_id) {
            return None;
        }

        let leave = self.subscribed.take();
        self.attached = None;
        self.store.clear();
        self.echoed.clear();
        self.resync = None;
        let ticket = self.ticket(conversation_id);
        self.phase = SessionPhase::Loading {
            conversation_id,
            ticket,
        };
        debug!(conversation_id = %conversation_id, "Conversation selected");
        Some(SelectPlan { leave, ticket })
    }

    /// 历史拉取完成
    pub fn history_loaded(
        &mut self,
        ticket: HistoryTicket,
        result: ChatResult<Vec<Message>>,
    ) -> HistoryOutcome {
        let current = matches!(
            &self.phase,
            SessionPhase::Loading { ticket: expected, .. } if *expected == ticket
        );
        if !current {
            return HistoryOutcome::Stale;
        }

        let conversation_id = ticket.conversation_id;
        self.store.clear();
        let error = match result {
            Ok(messages) => {
                for message in messages {
                    self.store.append(MessageRecord::from(message));
                }
                None
            }
            Err(err) => Some(ChatError::history(conversation_id, err)),
        };

        let topic = conversation_topic(conversation_id);
        self.subscribed = Some(topic.clone());
        self.attached = Some(ticket);
        self.phase = SessionPhase::Active { conversation_id };
        HistoryOutcome::Ready {
            subscribe: topic,
            error,
        }
    }

    /// 订阅被拒绝（非参与者），退回 Idle
    pub fn abandon(&mut self) -> Option<String> {
        self.close()
    }

    /// 处理入站事件
    pub fn handle_inbound(&mut self, event: &TransportEvent) -> ChatResult<InboundOutcome> {
        let Some(conversation_id) = self.active_conversation() else {
            return Ok(InboundOutcome::Ignored);
        };
        if event.event != NEW_MESSAGE_EVENT || self.subscribed.as_deref() != Some(event.topic.as_str()) {
            return Ok(InboundOutcome::Ignored);
        }

        let message: Message = serde_json::from_value(event.payload.clone())?;
        if message.conversation_id != conversation_id {
            return Ok(InboundOutcome::Ignored);
        }
        if self.store.contains_server_id(message.id) {
            return Ok(InboundOutcome::Duplicate);
        }

        if message.sender.id == self.local_user.id {
            if let Some(local_id) = self
                .store
                .find_pending_for_echo(&message.sender, &message.content)
            {
                self.store
                    .replace(&local_id, MessageRecord::from(message.clone()));
                self.echoed.insert(local_id.clone(), message.id);
                return Ok(InboundOutcome::Reconciled { local_id, message });
            }
        }

        self.store.append(MessageRecord::from(message.clone()));
        Ok(InboundOutcome::Appended(message))
    }

    /// 开始发送：空白文本或无激活会话时返回 None
    pub fn begin_send(&mut self, text: &str) -> Option<PendingSend> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        let conversation_id = self.active_conversation()?;

        let local_id = self.ids.next_id();
        self.store.append(MessageRecord::pending(
            local_id.clone(),
            conversation_id,
            self.local_user.clone(),
            content.to_string(),
        ));
        Some(PendingSend {
            local_id,
            conversation_id,
            content: content.to_string(),
        })
    }

    /// 发送请求完成
    ///
    /// 失败时移除待确认记录并返回唯一的 `Send` 错误，即使同内容的回显已先完成对账；
    /// 不会自动重试。
    pub fn send_completed(
        &mut self,
        pending: &PendingSend,
        result: ChatResult<Message>,
    ) -> ChatResult<SendOutcome> {
        if self.active_conversation() != Some(pending.conversation_id) {
            return match result {
                Ok(_) => Ok(SendOutcome::Discarded),
                Err(err) => Err(ChatError::send(pending.local_id.clone(), err)),
            };
        }

        match result {
            Ok(message) => {
                self.echoed.remove(&pending.local_id);
                let server_id = message.id;
                let outcome = match self
                    .store
                    .replace(&pending.local_id, MessageRecord::from(message.clone()))
                {
                    ReplaceOutcome::Replaced => SendOutcome::Confirmed,
                    ReplaceOutcome::Absorbed => SendOutcome::Absorbed,
                    ReplaceOutcome::NotFound if self.store.contains_server_id(server_id) => {
                        SendOutcome::AlreadyConfirmed
                    }
                    ReplaceOutcome::NotFound => {
                        self.store.append(MessageRecord::from(message));
                        SendOutcome::AppendedLate
                    }
                };
                Ok(outcome)
            }
            Err(err) => {
                // 回显按内容匹配，可能来自同账号的其他设备，不能当作本次发送成功
                let echoed = self.echoed.remove(&pending.local_id);
                if self.store.remove_pending(&pending.local_id).is_none() {
                    debug!(local_id = %pending.local_id, ?echoed, "Send failed after a matching echo was reconciled");
                }
                Err(ChatError::send(pending.local_id.clone(), err))
            }
        }
    }

    /// 为当前激活会话发起重新同步
    pub fn begin_resync(&mut self) -> Option<HistoryTicket> {
        let conversation_id = self.active_conversation()?;
        let ticket = self.ticket(conversation_id);
        self.resync = Some(ticket);
        Some(ticket)
    }

    /// 合并最新一页历史，只追加缺失的服务端记录
    pub fn resync_loaded(
        &mut self,
        ticket: HistoryTicket,
        result: ChatResult<Vec<Message>>,
    ) -> ChatResult<ResyncOutcome> {
        if self.resync != Some(ticket) || self.active_conversation() != Some(ticket.conversation_id)
        {
            return Ok(ResyncOutcome::Stale);
        }
        self.resync = None;

        let messages = result.map_err(|err| ChatError::history(ticket.conversation_id, err))?;
        let mut merged = 0;
        for message in messages {
            if message.conversation_id != ticket.conversation_id {
                continue;
            }
            if message.sender.id == self.local_user.id && !self.store.contains_server_id(message.id)
            {
                if let Some(local_id) = self
                    .store
                    .find_pending_for_echo(&message.sender, &message.content)
                {
                    self.echoed.insert(local_id.clone(), message.id);
                    self.store.replace(&local_id, MessageRecord::from(message));
                    merged += 1;
                    continue;
                }
            }
            if self.store.append(MessageRecord::from(message)) {
                merged += 1;
            }
        }
        Ok(ResyncOutcome::Merged(merged))
    }

    /// 关闭会话，返回需要取消订阅的主题
    pub fn close(&mut self) -> Option<String> {
        self.phase = SessionPhase::Idle;
        self.store.clear();
        self.echoed.clear();
        self.resync = None;
        self.attached = None;
        self.subscribed.take()
    }
}
