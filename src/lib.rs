//! Unimarket 聊天实时投递核心
//!
//! 负责打开会话、恰好一次地收发消息、乐观发送与服务端确认的对账，以及断线后的恢复。

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod session;
pub mod store;
pub mod transport;

pub use api::{ChatApi, HttpChatApi};
pub use auth::{CredentialProvider, RefreshingCredentials, StaticCredentials};
pub use config::{ChatClientConfig, app_config, load_config, load_config_with_validation};
pub use error::{ChatError, ChatResult, NoticeSeverity, UserNotice};
pub use session::{ChatClient, ClientOptions, ConversationSession, Notice, SessionPhase};
pub use store::{DeliveryState, MessageRecord, MessageStore};
pub use transport::{ChannelSocketTransport, InMemoryTransport, Transport};
