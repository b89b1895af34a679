use climkit_bridge::config_flow::{self, UserInput};
use climkit_bridge::{ClimkitAPI, HomeAssistantAPI, Poller, Settings};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;

    if std::env::args().nth(1).as_deref() == Some("validate") {
        return validate(&settings).await;
    }

    info!("Starting Climkit bridge against {}", settings.api_url);
    let api = ClimkitAPI::new(
        settings.api_url.as_str(),
        settings.username.as_str(),
        settings.password.as_str(),
    );
    let store = Arc::new(HomeAssistantAPI::new(
        settings.ha_url.as_str(),
        settings.ha_token.as_str(),
    )?);

    let poller = Poller::setup(api, store).await?;
    let handle = poller.spawn(settings.scan_interval);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.stop().await;

    Ok(())
}

/// Checks the configured credentials without starting to poll
async fn validate(settings: &Settings) -> anyhow::Result<()> {
    let input = UserInput {
        username: settings.username.clone(),
        password: settings.password.clone(),
    };
    match config_flow::step_user(&settings.api_url, input).await {
        Ok(entry) => {
            println!("Credentials valid, entry '{}' for {}", entry.title, entry.data.username);
            Ok(())
        }
        Err(e) => anyhow::bail!("Credentials rejected: {}", e.code()),
    }
}
