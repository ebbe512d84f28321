use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use unimarket_chat::config::ChatClientConfig;
use unimarket_chat::metrics::{self, ChatMetrics, REGISTRY};
use unimarket_chat::model::User;
use unimarket_chat::session::{ClientOptions, Notice};
use unimarket_chat::{
    ChannelSocketTransport, ChatClient, CredentialProvider, HttpChatApi, RefreshingCredentials,
    StaticCredentials,
};

use crate::command::{ConsoleCommand, HELP};
use crate::view::ConsoleView;

/// 登录身份（由认证子系统签发，经环境变量传入）
#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub user: User,
    pub access_token: String,
    /// 缺省时令牌无法刷新，401 即视为会话失效
    pub refresh_token: Option<String>,
}

impl ConsoleSettings {
    /// 读取 `UNIMARKET_USER_ID`、`UNIMARKET_ACCESS_TOKEN` 等环境变量
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let user_id = non_empty("UNIMARKET_USER_ID")
            .ok_or_else(|| anyhow!("UNIMARKET_USER_ID must be set"))?;
        let user_id: i64 = user_id
            .trim()
            .parse()
            .with_context(|| format!("invalid UNIMARKET_USER_ID: {user_id}"))?;
        let access_token = non_empty("UNIMARKET_ACCESS_TOKEN")
            .ok_or_else(|| anyhow!("UNIMARKET_ACCESS_TOKEN must be set"))?;

        let mut user = User::new(
            user_id,
            non_empty("UNIMARKET_FIRST_NAME").as_deref().unwrap_or(""),
            non_empty("UNIMARKET_LAST_NAME").as_deref().unwrap_or(""),
        );
        user.username = non_empty("UNIMARKET_USERNAME");

        Ok(Self {
            user,
            access_token,
            refresh_token: non_empty("UNIMARKET_REFRESH_TOKEN"),
        })
    }
}

/// 组装客户端并运行交互循环，直到 `/quit`、输入结束或会话失效
pub async fn run(config: &ChatClientConfig, settings: ConsoleSettings) -> Result<()> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("unimarket-chat-console/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")?;

    let credentials: Arc<dyn CredentialProvider> = match &settings.refresh_token {
        Some(refresh_token) => {
            let refresh_url = config
                .rest
                .refresh_url()
                .context("invalid token refresh url")?;
            RefreshingCredentials::new(
                http.clone(),
                refresh_url,
                settings.access_token.clone(),
                refresh_token.clone(),
                config.rest.timeout(),
            )
        }
        None => Arc::new(StaticCredentials::new(settings.access_token.clone())),
    };

    let metrics = ChatMetrics::new(&REGISTRY).context("failed to register chat metrics")?;
    let transport = Arc::new(ChannelSocketTransport::with_metrics(
        config.realtime.clone(),
        http.clone(),
        credentials.clone(),
        metrics.clone(),
    ));
    let api = Arc::new(HttpChatApi::new(http, &config.rest, credentials.clone())?);
    let options = ClientOptions::from_config(&config.realtime, metrics);

    let (client, mut notices) =
        ChatClient::start(settings.user.clone(), transport, api, credentials, options).await?;
    info!(user = %settings.user.display_name(), "Chat console ready");
    println!("{HELP}");

    let mut view = ConsoleView::new(settings.user.id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => execute(&client, command)?,
                    Err(err) => println!("{err:#}"),
                }
            }
            notice = notices.recv() => {
                let Some(notice) = notice else {
                    break;
                };
                for line in view.render(&notice) {
                    println!("{line}");
                }
                if notice == Notice::SessionExpired {
                    warn!("Chat session expired");
                    break;
                }
            }
        }
    }

    client.close().await;
    Ok(())
}

fn execute(client: &ChatClient, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::List => client.refresh_conversations()?,
        ConsoleCommand::Open(conversation_id) => client.select(conversation_id)?,
        ConsoleCommand::Start {
            seller_id,
            product_id,
        } => client.start_conversation(seller_id, product_id)?,
        ConsoleCommand::Reload => client.reload()?,
        ConsoleCommand::Unread => client.unread_count()?,
        ConsoleCommand::Metrics => print!("{}", metrics::render(&REGISTRY)?),
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Send(text) => client.send(text)?,
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
