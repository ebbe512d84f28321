//! 会话驱动任务
//!
//! 单写者：命令、订阅信箱、已完成的请求和连接状态变化在同一个 `select!` 循环中
//! 串行处理，每个反应执行完毕后才处理下一个。网络请求（含频道订阅）在 `JoinSet`
//! 中并发执行，结果带票据回到循环。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::inbox::Inbox;
use super::state::{
    ConversationSession, HistoryOutcome, HistoryTicket, InboundOutcome, PendingSend,
    ResyncOutcome, SendOutcome, SessionPhase,
};
use crate::api::{ChatApi, StartConversation};
use crate::auth::CredentialProvider;
use crate::config::RealtimeConfig;
use crate::error::{ChatError, ChatResult, UserNotice};
use crate::metrics::ChatMetrics;
use crate::model::{Conversation, ConversationId, Message, NewMessage, ProductId, User, UserId};
use crate::store::MessageRecord;
use crate::transport::{
    ConnectionStatus, NEW_MESSAGE_EVENT, Subscription, Transport, TransportEvent,
};

/// 客户端选项
#[derive(Clone)]
pub struct ClientOptions {
    /// 订阅信箱容量
    pub mailbox_capacity: usize,
    pub metrics: ChatMetrics,
    /// 启动后是否立即拉取会话列表
    pub fetch_conversations_on_start: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            metrics: ChatMetrics::unregistered(),
            fetch_conversations_on_start: true,
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &RealtimeConfig, metrics: ChatMetrics) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            metrics,
            fetch_conversations_on_start: true,
        }
    }
}

/// 驱动命令
#[derive(Debug)]
pub enum Command {
    Select(ConversationId),
    Send(String),
    Reload,
    StartConversation {
        seller_id: UserId,
        product_id: Option<ProductId>,
    },
    RefreshConversations,
    UnreadCount,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Close,
}

/// 发给界面的通知
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    PhaseChanged(SessionPhase),
    MessagesChanged(Vec<MessageRecord>),
    Conversations(Vec<Conversation>),
    ConversationRedirected { existing_id: ConversationId },
    UnreadCount(u64),
    Connection(ConnectionStatus),
    Error(UserNotice),
    /// 凭证失效，会话已拆除，需要重新登录
    SessionExpired,
}

/// 会话快照
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub messages: Vec<MessageRecord>,
    pub conversations: Vec<Conversation>,
    pub connection: ConnectionStatus,
}

/// 后台请求的结果
enum TaskOutput {
    History {
        ticket: HistoryTicket,
        elapsed: Duration,
        result: ChatResult<Vec<Message>>,
    },
    Resync {
        ticket: HistoryTicket,
        result: ChatResult<Vec<Message>>,
    },
    Subscribed {
        ticket: HistoryTicket,
        topic: String,
        result: ChatResult<Subscription>,
    },
    Sent {
        pending: PendingSend,
        result: ChatResult<Message>,
    },
    Conversations(ChatResult<Vec<Conversation>>),
    Started(ChatResult<Conversation>),
    MarkedRead {
        conversation_id: ConversationId,
        result: ChatResult<()>,
    },
    Unread(ChatResult<u64>),
}

/// 聊天客户端句柄
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ChatClient {
    /// 连接传输层并启动驱动任务
    ///
    /// 连接因授权失败被拒时刷新凭证重试一次。
    pub async fn start(
        local_user: User,
        transport: Arc<dyn Transport>,
        api: Arc<dyn ChatApi>,
        credentials: Arc<dyn CredentialProvider>,
        options: ClientOptions,
    ) -> ChatResult<(Self, mpsc::UnboundedReceiver<Notice>)> {
        let token = credentials.access_token().await?;
        let connection = match transport.connect(&token).await {
            Err(ChatError::Authorization { .. }) => {
                debug!("Realtime connection rejected, refreshing credentials");
                let fresh = credentials.refresh(&token).await?;
                transport.connect(&fresh).await.map_err(|err| match err {
                    ChatError::Authorization { message, .. } => ChatError::session_expired(message),
                    other => other,
                })?
            }
            other => other?,
        };
        info!(
            user_id = %local_user.id,
            socket_id = %connection.socket_id,
            "Chat client connected"
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let mut status = transport.status();
        drop(status.borrow_and_update());

        let mut driver = Driver {
            session: ConversationSession::new(local_user),
            inbox: Inbox::new(),
            transport,
            api,
            metrics: options.metrics,
            mailbox_capacity: options.mailbox_capacity.max(1),
            mailbox: None,
            tasks: JoinSet::new(),
            notices,
            status,
            status_open: true,
            interrupted: false,
            expired: None,
        };
        if options.fetch_conversations_on_start {
            driver.refresh_conversations();
        }

        let task = tokio::spawn(driver.run(command_rx));
        Ok((Self { commands, task }, notice_rx))
    }

    fn command(&self, command: Command) -> ChatResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ChatError::SessionClosed)
    }

    /// 打开会话（已是当前会话时无操作）
    pub fn select(&self, conversation_id: ConversationId) -> ChatResult<()> {
        self.command(Command::Select(conversation_id))
    }

    /// 发送文本（空白或无激活会话时无操作）
    pub fn send(&self, text: impl Into<String>) -> ChatResult<()> {
        self.command(Command::Send(text.into()))
    }

    /// 重新拉取当前会话的最新历史
    pub fn reload(&self) -> ChatResult<()> {
        self.command(Command::Reload)
    }

    pub fn start_conversation(
        &self,
        seller_id: UserId,
        product_id: Option<ProductId>,
    ) -> ChatResult<()> {
        self.command(Command::StartConversation {
            seller_id,
            product_id,
        })
    }

    pub fn refresh_conversations(&self) -> ChatResult<()> {
        self.command(Command::RefreshConversations)
    }

    pub fn unread_count(&self) -> ChatResult<()> {
        self.command(Command::UnreadCount)
    }

    pub async fn snapshot(&self) -> ChatResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }

    /// 拆除会话并关闭传输层
    pub async fn close(self) {
        if self.command(Command::Close).is_ok() {
            if let Err(err) = self.task.await {
                warn!(error = %err, "Chat driver task failed");
            }
        }
    }

    /// 驱动任务是否已结束（关闭或会话失效）
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct Driver {
    session: ConversationSession,
    inbox: Inbox,
    transport: Arc<dyn Transport>,
    api: Arc<dyn ChatApi>,
    metrics: ChatMetrics,
    mailbox_capacity: usize,
    mailbox: Option<mpsc::Receiver<TransportEvent>>,
    tasks: JoinSet<TaskOutput>,
    notices: mpsc::UnboundedSender<Notice>,
    status: watch::Receiver<ConnectionStatus>,
    status_open: bool,
    /// 连接中断过，恢复后需要重新同步
    interrupted: bool,
    /// 致命错误，循环结束前拆除会话
    expired: Option<ChatError>,
}

async fn next_event(mailbox: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match mailbox {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close) | None => {
                        self.teardown().await;
                        self.transport.close().await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                event = next_event(&mut self.mailbox) => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("Subscription mailbox closed");
                        self.mailbox = None;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(output) => self.handle_output(output).await,
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => warn!(error = %err, "Chat request task failed"),
                },
                changed = self.status.changed(), if self.status_open => match changed {
                    Ok(()) => self.handle_status(),
                    Err(_) => self.status_open = false,
                },
            }

            if let Some(err) = self.expired.take() {
                warn!(error = %err, "Credentials expired, tearing down chat session");
                self.teardown().await;
                self.transport.close().await;
                self.emit(Notice::Error(UserNotice::from(&err)));
                self.emit(Notice::SessionExpired);
                break;
            }
        }
        debug!("Chat driver stopped");
    }

    fn emit(&self, notice: Notice) {
        // 接收端已丢弃时通知无人消费
        let _ = self.notices.send(notice);
    }

    fn emit_messages(&self) {
        self.metrics
            .pending_messages
            .set(self.session.store().pending_count() as i64);
        self.emit(Notice::MessagesChanged(self.session.store().list().to_vec()));
    }

    fn emit_phase(&self) {
        self.emit(Notice::PhaseChanged(self.session.phase().clone()));
    }

    /// 非致命错误提示一次；致命错误交给循环拆除会话
    fn report(&mut self, err: ChatError) {
        if err.is_fatal() {
            self.expired = Some(err);
            return;
        }
        warn!(error = %err, "Chat operation failed");
        self.emit(Notice::Error(UserNotice::from(&err)));
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select(conversation_id) => self.select(conversation_id).await,
            Command::Send(text) => self.send(&text),
            Command::Reload => self.resync(),
            Command::StartConversation {
                seller_id,
                product_id,
            } => {
                let api = self.api.clone();
                self.tasks.spawn(async move {
                    TaskOutput::Started(
                        api.start_conversation(StartConversation {
                            seller_id,
                            product_id,
                        })
                        .await,
                    )
                });
            }
            Command::RefreshConversations => self.refresh_conversations(),
            Command::UnreadCount => {
                let api = self.api.clone();
                self.tasks
                    .spawn(async move { TaskOutput::Unread(api.unread_count().await) });
            }
            Command::Snapshot(reply) => {
                let snapshot = SessionSnapshot {
                    phase: self.session.phase().clone(),
                    messages: self.session.store().list().to_vec(),
                    conversations: self.inbox.list().to_vec(),
                    connection: self.status.borrow().clone(),
                };
                let _ = reply.send(snapshot);
            }
            Command::Close => {}
        }
    }

    fn refresh_conversations(&mut self) {
        let api = self.api.clone();
        self.tasks
            .spawn(async move { TaskOutput::Conversations(api.list_conversations().await) });
    }

    async fn select(&mut self, conversation_id: ConversationId) {
        let Some(plan) = self.session.select_conversation(conversation_id) else {
            debug!(conversation_id = %conversation_id, "Conversation already open");
            return;
        };
        if let Some(topic) = plan.leave {
            self.detach(&topic).await;
        }
        self.emit_phase();
        self.emit_messages();

        let api = self.api.clone();
        let ticket = plan.ticket;
        self.tasks.spawn(async move {
            let started = Instant::now();
            let result = api.list_messages(ticket.conversation_id, None).await;
            TaskOutput::History {
                ticket,
                elapsed: started.elapsed(),
                result,
            }
        });
    }

    fn send(&mut self, text: &str) {
        let Some(pending) = self.session.begin_send(text) else {
            debug!("Ignoring blank message or send without an open conversation");
            return;
        };
        self.emit_messages();

        let api = self.api.clone();
        self.tasks.spawn(async move {
            let result = api
                .create_message(NewMessage {
                    conversation: pending.conversation_id,
                    content: pending.content.clone(),
                })
                .await;
            TaskOutput::Sent { pending, result }
        });
    }

    fn resync(&mut self) {
        let Some(ticket) = self.session.begin_resync() else {
            return;
        };
        let api = self.api.clone();
        self.tasks.spawn(async move {
            let result = api.list_messages(ticket.conversation_id, None).await;
            TaskOutput::Resync { ticket, result }
        });
    }

    /// 注册信箱，订阅在后台完成
    fn attach(&mut self, ticket: HistoryTicket, topic: String) {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        self.transport.on_event(&topic, NEW_MESSAGE_EVENT, tx);
        self.mailbox = Some(rx);

        let transport = self.transport.clone();
        self.tasks.spawn(async move {
            let result = transport.subscribe(&topic).await;
            TaskOutput::Subscribed {
                ticket,
                topic,
                result,
            }
        });
    }

    async fn subscribed(
        &mut self,
        ticket: HistoryTicket,
        topic: String,
        result: ChatResult<Subscription>,
    ) {
        if !self.session.is_attached(ticket) {
            debug!(topic = %topic, "Discarding subscription result for a closed conversation");
            // 订阅晚于取消订阅完成时，服务端仍保留该频道
            if result.is_ok() && self.session.subscribed_topic() != Some(topic.as_str()) {
                if let Err(err) = self.transport.unsubscribe(&topic).await {
                    warn!(topic = %topic, error = %err, "Unsubscribe failed");
                }
            }
            return;
        }

        match result {
            Ok(subscription) => {
                info!(topic = %topic, channel = %subscription.channel, "Conversation subscribed");
            }
            Err(err @ ChatError::Authorization { .. }) if !err.is_fatal() => {
                self.transport.off_event(&topic, NEW_MESSAGE_EVENT);
                self.mailbox = None;
                self.session.abandon();
                self.emit_phase();
                self.emit_messages();
                self.report(err);
            }
            // 传输层保留该主题，重连后自动恢复
            Err(err) => self.report(err),
        }
    }

    /// 移除处理器并取消订阅
    async fn detach(&mut self, topic: &str) {
        self.transport.off_event(topic, NEW_MESSAGE_EVENT);
        self.mailbox = None;
        if let Err(err) = self.transport.unsubscribe(topic).await {
            warn!(topic = %topic, error = %err, "Unsubscribe failed");
        }
    }

    async fn teardown(&mut self) {
        self.tasks.abort_all();
        if let Some(topic) = self.session.close() {
            self.detach(&topic).await;
        }
        self.emit_phase();
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match self.session.handle_inbound(&event) {
            Ok(outcome) => {
                self.metrics.record_inbound(outcome.label());
                match outcome {
                    InboundOutcome::Appended(message)
                    | InboundOutcome::Reconciled { message, .. } => {
                        self.emit_messages();
                        if self.inbox.record_message(&message) {
                            self.emit(Notice::Conversations(self.inbox.list().to_vec()));
                        }
                    }
                    InboundOutcome::Duplicate | InboundOutcome::Ignored => {}
                }
            }
            Err(err) => {
                self.metrics.record_inbound("malformed");
                warn!(topic = %event.topic, error = %err, "Dropping malformed realtime event");
            }
        }
    }

    fn handle_status(&mut self) {
        let status = self.status.borrow_and_update().clone();
        debug!(status = %status, "Realtime connection status changed");
        match &status {
            ConnectionStatus::Connected { .. } if self.interrupted => {
                self.interrupted = false;
                info!("Realtime connection restored, resyncing active conversation");
                self.resync();
            }
            ConnectionStatus::Connected { .. } | ConnectionStatus::Connecting => {}
            ConnectionStatus::Disconnected
            | ConnectionStatus::Reconnecting { .. }
            | ConnectionStatus::Closed => self.interrupted = true,
            ConnectionStatus::Expired => {
                self.expired = Some(ChatError::session_expired(
                    "realtime connection rejected after token refresh",
                ));
            }
        }
        self.emit(Notice::Connection(status));
    }

    async fn handle_output(&mut self, output: TaskOutput) {
        match output {
            TaskOutput::History {
                ticket,
                elapsed,
                result,
            } => {
                self.metrics
                    .history_fetch_duration_seconds
                    .observe(elapsed.as_secs_f64());
                match self.session.history_loaded(ticket, result) {
                    HistoryOutcome::Stale => {
                        self.metrics.stale_responses_total.inc();
                        debug!(conversation_id = %ticket.conversation_id, "Discarding stale history response");
                    }
                    HistoryOutcome::Ready { subscribe, error } => {
                        if let Some(err) = error {
                            self.report(err);
                            if self.expired.is_some() {
                                return;
                            }
                        }
                        self.attach(ticket, subscribe);
                        self.emit_messages();
                        self.emit_phase();
                        self.mark_read(ticket.conversation_id);
                    }
                }
            }
            TaskOutput::Resync { ticket, result } => {
                match self.session.resync_loaded(ticket, result) {
                    Ok(ResyncOutcome::Stale) => self.metrics.stale_responses_total.inc(),
                    Ok(ResyncOutcome::Merged(0)) => {}
                    Ok(ResyncOutcome::Merged(count)) => {
                        debug!(conversation_id = %ticket.conversation_id, count, "Merged messages after resync");
                        self.emit_messages();
                    }
                    Err(err) => self.report(err),
                }
            }
            TaskOutput::Subscribed {
                ticket,
                topic,
                result,
            } => self.subscribed(ticket, topic, result).await,
            TaskOutput::Sent { pending, result } => {
                let confirmed = result.as_ref().ok().cloned();
                match self.session.send_completed(&pending, result) {
                    Ok(SendOutcome::Discarded) => {
                        self.metrics.messages_sent_total.inc();
                        self.metrics.stale_responses_total.inc();
                    }
                    Ok(outcome) => {
                        self.metrics.messages_sent_total.inc();
                        debug!(local_id = %pending.local_id, ?outcome, "Message confirmed");
                        if outcome != SendOutcome::AlreadyConfirmed {
                            self.emit_messages();
                        }
                        if let Some(message) = confirmed {
                            if self.inbox.record_message(&message) {
                                self.emit(Notice::Conversations(self.inbox.list().to_vec()));
                            }
                        }
                    }
                    Err(err) => {
                        self.metrics.send_failures_total.inc();
                        self.emit_messages();
                        self.report(err);
                    }
                }
            }
            TaskOutput::Conversations(result) => match result {
                Ok(conversations) => {
                    self.inbox.replace_all(conversations);
                    self.emit(Notice::Conversations(self.inbox.list().to_vec()));
                }
                Err(err) => self.report(err),
            },
            TaskOutput::Started(result) => match result {
                Ok(conversation) => {
                    let conversation_id = conversation.id;
                    info!(conversation_id = %conversation_id, "Conversation started");
                    self.inbox.upsert(conversation);
                    self.emit(Notice::Conversations(self.inbox.list().to_vec()));
                    self.select(conversation_id).await;
                }
                Err(ChatError::DuplicateConversation { existing_id }) => {
                    info!(conversation_id = %existing_id, "Conversation exists, redirecting");
                    self.emit(Notice::ConversationRedirected { existing_id });
                    if self.inbox.get(existing_id).is_none() {
                        self.refresh_conversations();
                    }
                    self.select(existing_id).await;
                }
                Err(err) => self.report(err),
            },
            TaskOutput::MarkedRead {
                conversation_id,
                result,
            } => match result {
                Ok(()) => {
                    if self.inbox.mark_read(conversation_id) {
                        self.emit(Notice::Conversations(self.inbox.list().to_vec()));
                    }
                }
                Err(err) if err.is_fatal() => self.report(err),
                Err(err) => {
                    debug!(conversation_id = %conversation_id, error = %err, "Mark as read failed");
                }
            },
            TaskOutput::Unread(result) => match result {
                Ok(count) => self.emit(Notice::UnreadCount(count)),
                Err(err) => self.report(err),
            },
        }
    }

    fn mark_read(&mut self, conversation_id: ConversationId) {
        let api = self.api.clone();
        self.tasks.spawn(async move {
            TaskOutput::MarkedRead {
                conversation_id,
                result: api.mark_read(conversation_id).await,
            }
        });
    }
}
