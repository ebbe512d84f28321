use serde::{Deserialize, Serialize};

use super::UserId;

/// 用户（由认证子系统拥有，本模块只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    pub fn new(id: i64, first_name: &str, last_name: &str) -> Self {
        Self {
            id: UserId(id),
            username: None,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            avatar: None,
        }
    }

    /// 展示名称，姓名为空时退回到用户名
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        self.username
            .clone()
            .unwrap_or_else(|| format!("user-{}", self.id))
    }
}
