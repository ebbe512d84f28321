//! 托管推送服务的 websocket 帧格式（协议版本 7）
//!
//! 帧为 `{"event": ..., "channel": ..., "data": ...}`，服务端下发的 `data`
//! 通常是 JSON 编码后的字符串，也可能直接是对象。

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ChatError, ChatResult};

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const ERROR: &str = "pusher:error";

/// 客户端事件名前缀
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// 原始帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Frame {
    pub fn decode(text: &str) -> ChatResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 展开 `data`：字符串形式的 JSON 会被解析，无法解析时保持原字符串
    pub fn payload(&self) -> Value {
        match &self.data {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| self.data.clone()),
            other => other.clone(),
        }
    }

    pub fn subscribe(channel: &str, auth: Option<&str>) -> Self {
        let mut data = json!({ "channel": channel });
        if let Some(auth) = auth {
            data["auth"] = Value::String(auth.to_string());
        }
        Self {
            event: SUBSCRIBE.to_string(),
            channel: None,
            data,
        }
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self {
            event: UNSUBSCRIBE.to_string(),
            channel: None,
            data: json!({ "channel": channel }),
        }
    }

    pub fn ping() -> Self {
        Self {
            event: PING.to_string(),
            channel: None,
            data: json!({}),
        }
    }

    pub fn pong() -> Self {
        Self {
            event: PONG.to_string(),
            channel: None,
            data: json!({}),
        }
    }

    /// 客户端事件，事件名缺少 `client-` 前缀时自动补齐
    pub fn client_event(channel: &str, event: &str, data: Value) -> Self {
        let event = if event.starts_with(CLIENT_EVENT_PREFIX) {
            event.to_string()
        } else {
            format!("{CLIENT_EVENT_PREFIX}{event}")
        };
        Self {
            event,
            channel: Some(channel.to_string()),
            data,
        }
    }
}

/// 服务端错误码对应的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// 4000-4099：不要重连
    Terminate,
    /// 4100-4199：退避后重连
    Backoff,
    /// 4200-4299：立即重连
    ReconnectNow,
}

impl ErrorAction {
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(4000..=4099) => Self::Terminate,
            Some(4200..=4299) => Self::ReconnectNow,
            _ => Self::Backoff,
        }
    }
}

/// 解析后的服务端消息
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConnectionEstablished {
        socket_id: String,
        /// 服务端建议的活动超时（秒）
        activity_timeout: Option<u64>,
    },
    SubscriptionSucceeded {
        channel: String,
    },
    SubscriptionError {
        channel: String,
        status: Option<u16>,
        message: String,
    },
    Error {
        code: Option<u16>,
        message: String,
    },
    Ping,
    Pong,
    Event {
        channel: String,
        event: String,
        payload: Value,
    },
}

impl ServerMessage {
    pub fn parse(text: &str) -> ChatResult<Self> {
        let frame = Frame::decode(text)?;
        let payload = frame.payload();

        let message = match frame.event.as_str() {
            CONNECTION_ESTABLISHED => {
                let socket_id = payload
                    .get("socket_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChatError::Decode("connection_established without socket_id".into()))?
                    .to_string();
                Self::ConnectionEstablished {
                    socket_id,
                    activity_timeout: payload.get("activity_timeout").and_then(Value::as_u64),
                }
            }
            SUBSCRIPTION_SUCCEEDED => Self::SubscriptionSucceeded {
                channel: frame.channel.unwrap_or_default(),
            },
            SUBSCRIPTION_ERROR => Self::SubscriptionError {
                channel: frame.channel.unwrap_or_default(),
                status: payload
                    .get("status")
                    .and_then(Value::as_u64)
                    .and_then(|s| u16::try_from(s).ok()),
                message: payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("subscription rejected")
                    .to_string(),
            },
            ERROR => Self::Error {
                code: payload
                    .get("code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok()),
                message: payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            PING => Self::Ping,
            PONG => Self::Pong,
            _ => match frame.channel {
                Some(channel) => Self::Event {
                    channel,
                    event: frame.event,
                    payload,
                },
                None => {
                    return Err(ChatError::Decode(format!(
                        "unexpected event without channel: {}",
                        frame.event
                    )));
                }
            },
        };
        Ok(message)
    }
}
