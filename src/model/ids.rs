//! 标识符类型
//!
//! - 服务端分配的数值 ID（会话、消息、用户）
//! - 客户端发送时生成的本地临时 ID

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// 本地临时 ID 的前缀
pub const LOCAL_ID_PREFIX: &str = "temp-";

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// 会话 ID
    ConversationId
);
numeric_id!(
    /// 服务端消息 ID（权威）
    MessageId
);
numeric_id!(
    /// 用户 ID
    UserId
);
numeric_id!(
    /// 商品 ID
    ProductId
);

/// 本地临时 ID，发送时生成，确认后失效
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 本地临时 ID 生成器
///
/// ULID 由毫秒时间戳和随机部分组成，单调生成器保证同一毫秒内的多次发送也不会冲突。
pub struct LocalIdGenerator {
    generator: Generator,
}

impl Default for LocalIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdGenerator").finish_non_exhaustive()
    }
}

impl LocalIdGenerator {
    pub fn new() -> Self {
        Self {
            generator: Generator::new(),
        }
    }

    pub fn next_id(&mut self) -> LocalId {
        // 同一毫秒内随机部分溢出时退回到普通 ULID
        let ulid = self.generator.generate().unwrap_or_else(|_| Ulid::new());
        LocalId(format!("{LOCAL_ID_PREFIX}{}", ulid.to_string().to_lowercase()))
    }
}
