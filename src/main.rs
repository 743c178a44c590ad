mod config;
mod cookies;
mod extract;
mod models;
mod telegram;
mod web;

use anyhow::Context;

use config::Config;
use telegram::TelegramBot;
use web::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    match &config.bot_token {
        Some(token) => {
            tracing::info!("BOT_TOKEN found, starting Telegram bot");
            let bot = TelegramBot::new(
                config.telegram_api_base.clone(),
                token.clone(),
                config.fetch.clone(),
            )
            .context("failed to build Telegram client")?;
            tokio::spawn(bot.run());
        }
        None => tracing::info!("BOT_TOKEN not provided, Telegram bot is disabled"),
    }

    let app = web::router(AppState {
        fetch: config.fetch.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
