//! 基于 reqwest 的聊天 API 实现

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::{ChatApi, Page, StartConversation, UnreadCount};
use crate::auth::CredentialProvider;
use crate::config::RestConfig;
use crate::error::{ChatError, ChatResult};
use crate::model::{Conversation, ConversationId, Message, NewMessage};

/// HTTP 聊天 API
#[derive(Clone)]
pub struct HttpChatApi {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpChatApi {
    pub fn new(
        http: reqwest::Client,
        config: &RestConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> ChatResult<Self> {
        let base_url = config.api_root().map_err(|e| {
            ChatError::Config(format!("invalid rest.base_url {}: {e}", config.base_url))
        })?;
        Ok(Self {
            http,
            base_url,
            timeout: config.timeout(),
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> ChatResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ChatError::Config(format!("invalid endpoint {path}: {e}")))
    }

    /// 带凭证发送请求；401 时刷新凭证并重试一次，仍为 401 则会话失效
    async fn send_authorized(
        &self,
        method: Method,
        url: Url,
        build: impl Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    ) -> ChatResult<Response> {
        let mut token = self.credentials.access_token().await?;
        let mut refreshed = false;

        loop {
            let request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&token)
                .timeout(self.timeout);
            let response = build(request).send().await.map_err(|e| self.map_send_error(e))?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            if refreshed {
                warn!(url = %url, "Request rejected after token refresh");
                return Err(ChatError::session_expired("credentials rejected after refresh"));
            }

            debug!(url = %url, "Got 401, refreshing access token");
            token = self.credentials.refresh(&token).await?;
            refreshed = true;
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> ChatError {
        if err.is_timeout() {
            ChatError::Timeout(self.timeout)
        } else {
            ChatError::from(err)
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> ChatResult<T> {
        let response = error_for_status(response).await?;
        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// 非 2xx 状态转为错误，403 视为授权错误
async fn error_for_status(response: Response) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::FORBIDDEN {
        return Err(ChatError::authorization(message));
    }
    Err(ChatError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>> {
        let url = self.endpoint("chat/conversations/")?;
        let response = self.send_authorized(Method::GET, url, |r| r).await?;
        let page: Page<Conversation> = self.read_json(response).await?;
        Ok(page.into_items())
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: Option<u32>,
    ) -> ChatResult<Vec<Message>> {
        let mut url = self.endpoint(&format!("chat/conversations/{conversation_id}/messages/"))?;
        if let Some(page) = page {
            url.query_pairs_mut().append_pair("page", &page.to_string());
        }
        let response = self.send_authorized(Method::GET, url, |r| r).await?;
        let page: Page<Message> = self.read_json(response).await?;
        let mut messages = page.into_items();
        // 后端按时间正序返回，这里保证稳定
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn create_message(&self, message: NewMessage) -> ChatResult<Message> {
        let url = self.endpoint("chat/messages/create/")?;
        let response = self
            .send_authorized(Method::POST, url, |r| r.json(&message))
            .await?;
        self.read_json(response).await
    }

    async fn start_conversation(&self, request: StartConversation) -> ChatResult<Conversation> {
        let url = self.endpoint("chat/conversations/start/")?;
        let response = self
            .send_authorized(Method::POST, url, |r| r.json(&request))
            .await?;

        match response.status() {
            StatusCode::CREATED => self.read_json(response).await,
            // 200 表示两人已有该商品的会话
            StatusCode::OK => {
                let existing: Conversation = self.read_json(response).await?;
                Err(ChatError::DuplicateConversation {
                    existing_id: existing.id,
                })
            }
            _ => self.read_json(response).await,
        }
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> ChatResult<()> {
        let url = self.endpoint(&format!("chat/conversations/{conversation_id}/mark-read/"))?;
        let response = self.send_authorized(Method::POST, url, |r| r).await?;
        error_for_status(response).await?;
        Ok(())
    }

    async fn unread_count(&self) -> ChatResult<u64> {
        let url = self.endpoint("chat/messages/unread-count/")?;
        let response = self.send_authorized(Method::GET, url, |r| r).await?;
        let body: UnreadCount = self.read_json(response).await?;
        Ok(body.unread_count)
    }
}
