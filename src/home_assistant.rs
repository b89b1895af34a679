use crate::errors::ClimkitResult;
use crate::meter::SensorState;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Destination for published sensor states
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Replaces whatever state `state.entity_id` held before
    async fn publish(&self, state: &SensorState) -> Result<(), anyhow::Error>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HomeAssistantAPI {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl HomeAssistantAPI {
    pub fn new(
        endpoint_url: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> ClimkitResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            endpoint_url: endpoint_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            client,
        })
    }
}

#[async_trait]
impl StateStore for HomeAssistantAPI {
    async fn publish(&self, state: &SensorState) -> Result<(), anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        let response = self
            .client
            .post(format!("{}/api/states/{}", self.endpoint_url, state.entity_id))
            .bearer_auth(&self.auth_token)
            .json(state)
            .send()
            .await?
            .error_for_status()?;
        debug!(
            "Published {} = {} ({})",
            state.entity_id,
            state.state,
            response.status()
        );
        Ok(())
    }
}
