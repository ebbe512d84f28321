use anyhow::{Context, Result, anyhow, bail};
use unimarket_chat::model::{ConversationId, ProductId, UserId};

pub const HELP: &str = "\
Commands:
  /list                      refresh the conversation list
  /open <conversation_id>    open a conversation
  /start <seller_id> [product_id]
                             start (or reopen) a conversation with a seller
  /reload                    fetch the latest messages again
  /unread                    show the unread message count
  /metrics                   print client metrics
  /help                      show this help
  /quit                      leave
Any other line is sent to the open conversation (start with // to send a leading slash).";

/// 终端命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Open(ConversationId),
    Start {
        seller_id: UserId,
        product_id: Option<ProductId>,
    },
    Reload,
    Unread,
    Metrics,
    Help,
    Quit,
    Send(String),
}

impl ConsoleCommand {
    /// 解析一行输入，空行返回 `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_string())));
        };
        if rest.starts_with('/') {
            return Ok(Some(Self::Send(rest.to_string())));
        }

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let command = match name {
            "list" => Self::List,
            "open" => Self::Open(ConversationId(parse_id(parts.next(), "conversation id")?)),
            "start" => {
                let seller_id = UserId(parse_id(parts.next(), "seller id")?);
                let product_id = parts
                    .next()
                    .map(|raw| parse_id(Some(raw), "product id").map(ProductId))
                    .transpose()?;
                Self::Start {
                    seller_id,
                    product_id,
                }
            }
            "reload" => Self::Reload,
            "unread" => Self::Unread,
            "metrics" => Self::Metrics,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command /{other}, try /help"),
        };
        Ok(Some(command))
    }
}

fn parse_id(raw: Option<&str>, what: &str) -> Result<i64> {
    let raw = raw.ok_or_else(|| anyhow!("missing {what}"))?;
    raw.parse()
        .with_context(|| format!("invalid {what}: {raw}"))
}
