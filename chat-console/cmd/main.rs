use chat_console::{ConsoleSettings, run};
use tracing::info;
use unimarket_chat::load_config_with_validation;
use unimarket_chat::logging::init_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("UNIMARKET_CONFIG").ok();
    let config = load_config_with_validation(config_path.as_deref())?;
    init_tracing_from_config(Some(&config.logging));

    let settings = ConsoleSettings::from_env()?;
    info!(
        user_id = %settings.user.id,
        base_url = %config.rest.base_url,
        "Starting chat console"
    );

    run(config, settings).await
}
