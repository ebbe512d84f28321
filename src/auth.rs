//! 访问凭证
//!
//! 凭证由认证子系统签发，本模块只负责携带和在 401 时刷新一次。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::error::{ChatError, ChatResult};

/// 访问凭证提供者
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 当前访问令牌
    async fn access_token(&self) -> ChatResult<String>;

    /// 刷新访问令牌；`rejected` 为被拒绝的令牌，已被其他调用方刷新时直接返回新令牌
    async fn refresh(&self, rejected: &str) -> ChatResult<String>;
}

/// 固定令牌（无法刷新）
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> ChatResult<String> {
        Ok(self.token.clone())
    }

    async fn refresh(&self, _rejected: &str) -> ChatResult<String> {
        Err(ChatError::session_expired("access token cannot be refreshed"))
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

/// 使用刷新令牌换取新访问令牌的凭证
pub struct RefreshingCredentials {
    http: reqwest::Client,
    refresh_url: Url,
    refresh_token: String,
    access: RwLock<String>,
    /// 串行化刷新，避免并发 401 触发多次刷新
    refresh_lock: Mutex<()>,
    timeout: Duration,
}

impl RefreshingCredentials {
    pub fn new(
        http: reqwest::Client,
        refresh_url: Url,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            http,
            refresh_url,
            refresh_token: refresh_token.into(),
            access: RwLock::new(access_token.into()),
            refresh_lock: Mutex::new(()),
            timeout,
        })
    }
}

#[async_trait]
impl CredentialProvider for RefreshingCredentials {
    async fn access_token(&self) -> ChatResult<String> {
        Ok(self.access.read().await.clone())
    }

    async fn refresh(&self, rejected: &str) -> ChatResult<String> {
        let _guard = self.refresh_lock.lock().await;

        {
            let current = self.access.read().await;
            if current.as_str() != rejected {
                return Ok(current.clone());
            }
        }

        let response = self
            .http
            .post(self.refresh_url.clone())
            .timeout(self.timeout)
            .json(&RefreshRequest {
                refresh: &self.refresh_token,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::Timeout(self.timeout)
                } else {
                    ChatError::from(e)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::BAD_REQUEST {
            warn!(status = status.as_u16(), "Refresh token rejected");
            return Err(ChatError::session_expired("refresh token rejected"));
        }
        if !status.is_success() {
            return Err(ChatError::Http {
                status: status.as_u16(),
                message: "token refresh failed".to_string(),
            });
        }

        let body: RefreshResponse = response.json().await?;
        *self.access.write().await = body.access.clone();
        info!("Access token refreshed");
        Ok(body.access)
    }
}
