//! 基于 websocket 的托管推送服务传输实现
//!
//! - 单连接，后台 worker 负责读写、心跳和断线重连
//! - 私有频道订阅前向授权端点换取签名
//! - 重连成功后重新订阅断线时的全部主题，完成后才发布 `Connected`
//! - 重连握手被拒时刷新凭证重试一次，仍被拒则发布 `Expired` 并停止重连

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::protocol::{ErrorAction, Frame, ServerMessage};
use super::{
    ConnectionInfo, ConnectionStatus, EventHandler, OutboundEvent, Subscription, Transport,
    TransportEvent, backoff_delay,
};
use crate::auth::CredentialProvider;
use crate::config::RealtimeConfig;
use crate::error::{ChatError, ChatResult};
use crate::metrics::ChatMetrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 服务端建议的活动超时缺省值
const DEFAULT_SERVER_ACTIVITY_SECS: u64 = 120;

/// 当前连接的写端
#[derive(Clone)]
struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    socket_id: String,
}

/// 连接断开的原因
#[derive(Debug)]
enum DropReason {
    /// 本地主动关闭
    Closed,
    /// 服务端要求不再重连
    Terminate(String),
    /// 需要重连
    Reconnect { immediate: bool },
}

/// 处理一条入站文本帧后的动作
enum Handled {
    Continue,
    Reply(Frame),
    Drop(DropReason),
}

#[derive(Serialize)]
struct ChannelAuthRequest<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
}

#[derive(Deserialize)]
struct ChannelAuthResponse {
    auth: String,
}

struct Inner {
    config: RealtimeConfig,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    metrics: ChatMetrics,
    token: RwLock<String>,
    /// (topic, event) -> 信箱
    handlers: DashMap<(String, String), EventHandler>,
    /// 期望保持的订阅（重连后恢复）
    topics: DashMap<String, ()>,
    /// channel -> 等待订阅结果的调用方
    pending: DashMap<String, oneshot::Sender<ChatResult<()>>>,
    link: RwLock<Option<Link>>,
    status: watch::Sender<ConnectionStatus>,
    worker: Mutex<Option<JoinHandle<()>>>,
    connect_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// 托管推送服务传输
#[derive(Clone)]
pub struct ChannelSocketTransport {
    inner: Arc<Inner>,
}

impl ChannelSocketTransport {
    pub fn new(
        config: RealtimeConfig,
        http: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::with_metrics(config, http, credentials, ChatMetrics::unregistered())
    }

    pub fn with_metrics(
        config: RealtimeConfig,
        http: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
        metrics: ChatMetrics,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                http,
                credentials,
                metrics,
                token: RwLock::new(String::new()),
                handlers: DashMap::new(),
                topics: DashMap::new(),
                pending: DashMap::new(),
                link: RwLock::new(None),
                status,
                worker: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 服务商侧频道名
    pub fn channel_name(&self, topic: &str) -> String {
        self.inner.channel_for(topic)
    }
}

#[async_trait]
impl Transport for ChannelSocketTransport {
    async fn connect(&self, auth_token: &str) -> ChatResult<ConnectionInfo> {
        let inner = &self.inner;
        let _guard = inner.connect_lock.lock().await;

        inner.set_token(auth_token);
        if let Some(link) = inner.link() {
            return Ok(ConnectionInfo {
                socket_id: link.socket_id,
            });
        }

        inner.closed.store(false, Ordering::SeqCst);
        inner.status.send_replace(ConnectionStatus::Connecting);

        let (ws, socket_id, activity) = match inner.open_socket().await {
            Ok(opened) => opened,
            Err(err) => {
                warn!(error = %err, "Realtime connection failed");
                inner.status.send_replace(ConnectionStatus::Disconnected);
                return Err(err);
            }
        };

        let outbound = inner.install_link(&socket_id);
        inner.status.send_replace(ConnectionStatus::Connected {
            socket_id: socket_id.clone(),
        });
        info!(socket_id = %socket_id, "Realtime connection established");

        let worker = tokio::spawn(supervise(inner.clone(), ws, outbound, activity));
        let previous = inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(worker);
        if let Some(previous) = previous {
            previous.abort();
        }

        Ok(ConnectionInfo { socket_id })
    }

    async fn subscribe(&self, topic: &str) -> ChatResult<Subscription> {
        let inner = &self.inner;
        inner.topics.insert(topic.to_string(), ());

        match inner.subscribe_channel(topic).await {
            Ok(subscription) => Ok(subscription),
            Err(err) => {
                // 连接类错误保留期望订阅，由重连恢复
                if matches!(err, ChatError::Authorization { .. } | ChatError::Http { .. }) {
                    inner.topics.remove(topic);
                }
                Err(err)
            }
        }
    }

    async fn unsubscribe(&self, topic: &str) -> ChatResult<()> {
        let inner = &self.inner;
        if inner.topics.remove(topic).is_none() {
            return Ok(());
        }
        inner.handlers.retain(|(t, _), _| t != topic);

        let channel = inner.channel_for(topic);
        inner.pending.remove(&channel);
        // 连接已断开时服务端侧的订阅随之失效
        if let Some(link) = inner.link() {
            if let Err(err) = inner.send_frame(&link, &Frame::unsubscribe(&channel)) {
                debug!(topic = %topic, error = %err, "Unsubscribe frame not sent");
            }
        }
        debug!(topic = %topic, "Unsubscribed");
        Ok(())
    }

    fn on_event(&self, topic: &str, event: &str, handler: EventHandler) {
        self.inner
            .handlers
            .insert((topic.to_string(), event.to_string()), handler);
    }

    fn off_event(&self, topic: &str, event: &str) {
        self.inner
            .handlers
            .remove(&(topic.to_string(), event.to_string()));
    }

    async fn send(&self, topic: &str, event: OutboundEvent) -> ChatResult<()> {
        let inner = &self.inner;
        if !inner.topics.contains_key(topic) {
            return Err(ChatError::Connection(format!("not subscribed to {topic}")));
        }
        let link = inner
            .link()
            .ok_or_else(|| ChatError::Connection("not connected".into()))?;
        let frame = Frame::client_event(&inner.channel_for(topic), &event.event, event.payload);
        inner.send_frame(&link, &frame)
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    async fn close(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.topics.clear();
        inner.handlers.clear();
        inner.fail_pending("connection closed");

        // 丢弃写端后 worker 发送 Close 帧并退出
        inner.clear_link();
        let worker = inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(Duration::from_secs(1), &mut worker)
                .await
                .is_err()
            {
                worker.abort();
            }
        }
        inner.status.send_replace(ConnectionStatus::Closed);
        info!("Realtime connection closed");
    }
}

impl Inner {
    fn channel_for(&self, topic: &str) -> String {
        format!("{}{}", self.config.channel_prefix, topic)
    }

    fn topic_for<'a>(&self, channel: &'a str) -> &'a str {
        channel
            .strip_prefix(self.config.channel_prefix.as_str())
            .unwrap_or(channel)
    }

    fn set_token(&self, token: &str) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token.to_string();
    }

    fn token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn link(&self) -> Option<Link> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install_link(&self, socket_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (outbound, rx) = mpsc::unbounded_channel();
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(Link {
            outbound,
            socket_id: socket_id.to_string(),
        });
        rx
    }

    fn clear_link(&self) {
        self.link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// 凭证失效：停止重连并通知上层
    fn expire(&self, reason: &ChatError) {
        warn!(error = %reason, "Realtime credentials rejected, giving up");
        self.closed.store(true, Ordering::SeqCst);
        self.clear_link();
        self.fail_pending("credentials expired");
        self.status.send_replace(ConnectionStatus::Expired);
    }

    /// 重连握手被拒后刷新一次凭证
    async fn refresh_token(&self) -> ChatResult<()> {
        let rejected = self.token();
        let token = self.credentials.refresh(&rejected).await?;
        self.set_token(&token);
        Ok(())
    }

    fn fail_pending(&self, reason: &str) {
        let channels: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for channel in channels {
            if let Some((_, waiter)) = self.pending.remove(&channel) {
                let _ = waiter.send(Err(ChatError::Connection(reason.to_string())));
            }
        }
    }

    fn send_frame(&self, link: &Link, frame: &Frame) -> ChatResult<()> {
        let text = frame.encode()?;
        link.outbound
            .send(Message::text(text))
            .map_err(|_| ChatError::Connection("connection lost".into()))
    }

    /// 建立 websocket 并等待 `connection_established`
    async fn open_socket(&self) -> ChatResult<(WsStream, String, Duration)> {
        let url = self.config.socket_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Connection(format!("invalid realtime url: {e}")))?;
        let token = self.token();
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ChatError::authorization(format!("invalid token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let timeout = self.config.connect_timeout();
        let handshake = async {
            let (mut ws, _) = connect_async(request).await.map_err(classify_handshake_error)?;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => match ServerMessage::parse(text.as_str())? {
                        ServerMessage::ConnectionEstablished {
                            socket_id,
                            activity_timeout,
                        } => {
                            let server = Duration::from_secs(
                                activity_timeout.unwrap_or(DEFAULT_SERVER_ACTIVITY_SECS),
                            );
                            let activity = server.min(self.config.activity_timeout());
                            return Ok((ws, socket_id, activity));
                        }
                        ServerMessage::Error { code, message } => {
                            return Err(classify_protocol_error(code, &message));
                        }
                        _ => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(ChatError::Connection(
                            "connection closed during handshake".into(),
                        ));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(ChatError::Connection(e.to_string())),
                }
            }
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| ChatError::Timeout(timeout))?
    }

    /// 订阅单个主题：授权、发送订阅帧、等待确认
    async fn subscribe_channel(&self, topic: &str) -> ChatResult<Subscription> {
        let link = self
            .link()
            .ok_or_else(|| ChatError::Connection("not connected".into()))?;
        let channel = self.channel_for(topic);

        let auth = match &self.config.auth_endpoint {
            Some(endpoint) => Some(self.authorize(endpoint, &channel, &link.socket_id).await?),
            None => None,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(channel.clone(), tx);
        if let Err(err) = self.send_frame(&link, &Frame::subscribe(&channel, auth.as_deref())) {
            self.pending.remove(&channel);
            return Err(err);
        }

        let timeout = self.config.subscribe_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(topic = %topic, channel = %channel, "Subscribed");
                Ok(Subscription {
                    topic: topic.to_string(),
                    channel,
                })
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(ChatError::Connection("subscription abandoned".into())),
            Err(_) => {
                self.pending.remove(&channel);
                Err(ChatError::Timeout(timeout))
            }
        }
    }

    /// 私有频道授权，401 时刷新凭证重试一次
    async fn authorize(&self, endpoint: &str, channel: &str, socket_id: &str) -> ChatResult<String> {
        let mut token = self.token();
        let mut refreshed = false;

        loop {
            let response = self
                .http
                .post(endpoint)
                .bearer_auth(&token)
                .timeout(self.config.subscribe_timeout())
                .json(&ChannelAuthRequest {
                    socket_id,
                    channel_name: channel,
                })
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        ChatError::Timeout(self.config.subscribe_timeout())
                    } else {
                        ChatError::from(e)
                    }
                })?;

            match response.status() {
                status if status.is_success() => {
                    let body: ChannelAuthResponse = response.json().await?;
                    return Ok(body.auth);
                }
                reqwest::StatusCode::UNAUTHORIZED if !refreshed => {
                    debug!(channel = %channel, "Channel authorization got 401, refreshing token");
                    token = self.credentials.refresh(&token).await?;
                    self.set_token(&token);
                    refreshed = true;
                }
                reqwest::StatusCode::UNAUTHORIZED => {
                    return Err(ChatError::session_expired(
                        "channel authorization rejected after token refresh",
                    ));
                }
                reqwest::StatusCode::FORBIDDEN => {
                    return Err(ChatError::authorization(format!(
                        "not a participant of {channel}"
                    )));
                }
                status => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ChatError::Http {
                        status: status.as_u16(),
                        message,
                    });
                }
            }
        }
    }

    /// 恢复全部期望订阅；凭证失效时立即返回错误
    async fn resubscribe_all(&self) -> ChatResult<()> {
        let topics: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        for topic in topics {
            match self.subscribe_channel(&topic).await {
                Ok(_) => debug!(topic = %topic, "Resubscribed after reconnect"),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err @ ChatError::Authorization { .. }) => {
                    warn!(topic = %topic, error = %err, "Resubscription rejected");
                    self.topics.remove(&topic);
                }
                Err(err) => warn!(topic = %topic, error = %err, "Resubscription failed"),
            }
        }
        Ok(())
    }

    fn handle_text(&self, text: &str) -> Handled {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "Ignoring malformed realtime frame");
                return Handled::Continue;
            }
        };

        match message {
            ServerMessage::Ping => Handled::Reply(Frame::pong()),
            ServerMessage::Pong | ServerMessage::ConnectionEstablished { .. } => Handled::Continue,
            ServerMessage::SubscriptionSucceeded { channel } => {
                if let Some((_, waiter)) = self.pending.remove(&channel) {
                    let _ = waiter.send(Ok(()));
                }
                Handled::Continue
            }
            ServerMessage::SubscriptionError {
                channel,
                status,
                message,
            } => {
                let err = match status {
                    Some(401) | Some(403) => ChatError::authorization(message),
                    Some(status) => ChatError::Http { status, message },
                    None => ChatError::Connection(message),
                };
                if let Some((_, waiter)) = self.pending.remove(&channel) {
                    let _ = waiter.send(Err(err));
                }
                Handled::Continue
            }
            ServerMessage::Error { code: None, message } => {
                warn!(message = %message, "Realtime server reported an error");
                Handled::Continue
            }
            ServerMessage::Error { code, message } => match ErrorAction::from_code(code) {
                ErrorAction::Terminate => Handled::Drop(DropReason::Terminate(message)),
                ErrorAction::Backoff => Handled::Drop(DropReason::Reconnect { immediate: false }),
                ErrorAction::ReconnectNow => {
                    Handled::Drop(DropReason::Reconnect { immediate: true })
                }
            },
            ServerMessage::Event {
                channel,
                event,
                payload,
            } => {
                let topic = self.topic_for(&channel).to_string();
                self.dispatch(TransportEvent {
                    topic,
                    event,
                    payload,
                });
                Handled::Continue
            }
        }
    }

    /// 投递到信箱，信箱已满时丢弃并记录
    fn dispatch(&self, event: TransportEvent) {
        let key = (event.topic.clone(), event.event.clone());
        let Some(handler) = self.handlers.get(&key).map(|h| h.value().clone()) else {
            debug!(topic = %event.topic, event = %event.event, "No handler for event");
            return;
        };

        match handler.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.mailbox_dropped_total.inc();
                warn!(topic = %event.topic, event = %event.event, "Mailbox full, dropping realtime event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.handlers.remove(&key);
            }
        }
    }
}

/// 连接 worker：读写当前连接，断开后按退避策略重连
async fn supervise(
    inner: Arc<Inner>,
    mut ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut activity: Duration,
) {
    loop {
        let reason = serve(&inner, ws, &mut outbound, activity).await;
        inner.clear_link();
        inner.fail_pending("connection lost");

        let immediate = match reason {
            DropReason::Closed => return,
            DropReason::Terminate(message) => {
                warn!(message = %message, "Realtime server refused the connection, not reconnecting");
                inner.status.send_replace(ConnectionStatus::Closed);
                return;
            }
            DropReason::Reconnect { immediate } => immediate,
        };

        let mut attempt = 0u32;
        let mut refreshed = false;
        let (next_ws, socket_id, next_activity) = loop {
            attempt += 1;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            if let Some(max) = inner.config.max_reconnect_attempts {
                if attempt > max {
                    warn!(attempts = max, "Giving up realtime reconnection");
                    inner.status.send_replace(ConnectionStatus::Closed);
                    return;
                }
            }

            inner
                .status
                .send_replace(ConnectionStatus::Reconnecting { attempt });
            if !(immediate && attempt == 1) {
                let delay = backoff_delay(
                    attempt,
                    Duration::from_millis(inner.config.reconnect_interval_ms),
                    Duration::from_millis(inner.config.max_reconnect_delay_ms),
                );
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                tokio::time::sleep(delay).await;
            }
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }

            match inner.open_socket().await {
                Ok(opened) => break opened,
                Err(err @ ChatError::Authorization { .. }) if refreshed => {
                    inner.expire(&err);
                    return;
                }
                Err(ChatError::Authorization { message, .. }) => {
                    debug!(attempt, message = %message, "Reconnect rejected, refreshing token");
                    refreshed = true;
                    if let Err(err) = inner.refresh_token().await {
                        inner.expire(&err);
                        return;
                    }
                }
                Err(err) => warn!(attempt, error = %err, "Reconnect attempt failed"),
            }
        };

        inner.metrics.reconnects_total.inc();
        info!(socket_id = %socket_id, attempt, "Realtime connection re-established");
        ws = next_ws;
        activity = next_activity;
        outbound = inner.install_link(&socket_id);

        let resubscriber = inner.clone();
        tokio::spawn(async move {
            if let Err(err) = resubscriber.resubscribe_all().await {
                resubscriber.expire(&err);
                return;
            }
            let still_current = resubscriber
                .link()
                .map(|link| link.socket_id == socket_id)
                .unwrap_or(false);
            if still_current {
                resubscriber
                    .status
                    .send_replace(ConnectionStatus::Connected { socket_id });
            }
        });
    }
}

/// 读写单个连接直到断开
async fn serve(
    inner: &Inner,
    ws: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    activity: Duration,
) -> DropReason {
    let (mut sink, mut stream) = ws.split();
    let mut last_activity = Instant::now();
    let mut ping_sent: Option<Instant> = None;

    loop {
        let deadline = match ping_sent {
            Some(sent) => sent + inner.config.pong_timeout(),
            None => last_activity + activity,
        };

        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(message) => {
                    if let Err(err) = sink.send(message).await {
                        warn!(error = %err, "Realtime write failed");
                        return DropReason::Reconnect { immediate: false };
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return DropReason::Closed;
                }
            },
            incoming = stream.next() => {
                last_activity = Instant::now();
                ping_sent = None;
                match incoming {
                    Some(Ok(Message::Text(text))) => match inner.handle_text(text.as_str()) {
                        Handled::Continue => {}
                        Handled::Reply(frame) => {
                            let reply = match frame.encode() {
                                Ok(reply) => reply,
                                Err(err) => {
                                    warn!(error = %err, "Failed to encode reply frame");
                                    continue;
                                }
                            };
                            if sink.send(Message::text(reply)).await.is_err() {
                                return DropReason::Reconnect { immediate: false };
                            }
                        }
                        Handled::Drop(reason) => return reason,
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return DropReason::Reconnect { immediate: false };
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Realtime server closed the connection");
                        return DropReason::Reconnect { immediate: false };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "Realtime read failed");
                        return DropReason::Reconnect { immediate: false };
                    }
                    None => return DropReason::Reconnect { immediate: false },
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if ping_sent.is_some() {
                    warn!("Realtime pong timeout");
                    return DropReason::Reconnect { immediate: false };
                }
                let ping = match Frame::ping().encode() {
                    Ok(ping) => ping,
                    Err(_) => return DropReason::Reconnect { immediate: false },
                };
                if sink.send(Message::text(ping)).await.is_err() {
                    return DropReason::Reconnect { immediate: false };
                }
                ping_sent = Some(Instant::now());
            }
        }
    }
}

fn classify_handshake_error(err: tungstenite::Error) -> ChatError {
    match err {
        tungstenite::Error::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            ChatError::authorization(format!(
                "realtime handshake rejected ({})",
                response.status()
            ))
        }
        other => ChatError::Connection(other.to_string()),
    }
}

fn classify_protocol_error(code: Option<u16>, message: &str) -> ChatError {
    match code {
        // 4009: 连接未授权
        Some(4009) => ChatError::authorization(message.to_string()),
        Some(code) => ChatError::Connection(format!("rejected by server ({code}): {message}")),
        None => ChatError::Connection(message.to_string()),
    }
}
