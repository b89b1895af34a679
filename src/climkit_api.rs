use crate::errors::{ClimkitError, ClimkitResult};
use crate::meter::{Meter, MeterData, Site};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_API_URL: &str = "https://api.climkit.io/api/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Token-authenticated client for the Climkit REST API.
///
/// Every read degrades to an empty value on failure so that one bad meter
/// cannot abort a polling cycle. Only [`ClimkitAPI::authenticate`] fails hard.
pub struct ClimkitAPI {
    endpoint_url: String,
    username: String,
    password: String,
    token: Option<String>,
    client: Option<Client>,
}

impl ClimkitAPI {
    pub fn new(
        endpoint_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            token: None,
            client: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Returns the open HTTP client, opening one after a `close()` or on first use
    fn session(&mut self) -> ClimkitResult<Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Logs in and stores the bearer token used by every later call
    pub async fn authenticate(&mut self) -> ClimkitResult<()> {
        self.token = None;
        let client = self.session()?;
        let url = format!("{}/auth", self.endpoint_url);
        debug!("Authenticating against {} as {}", url, self.username);

        let response = client
            .post(&url)
            .json(&AuthRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!("Climkit authentication failed: {}", status);
            return Err(ClimkitError::Authentication {
                status: status.as_u16(),
            });
        }

        match response.json::<AuthResponse>().await?.token {
            Some(token) if !token.is_empty() => {
                info!("Authenticated against Climkit as {}", self.username);
                self.token = Some(token);
                Ok(())
            }
            _ => {
                error!("Climkit authentication response had no token");
                Err(ClimkitError::MissingToken)
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> ClimkitResult<T> {
        let (Some(client), Some(token)) = (&self.client, &self.token) else {
            return Err(ClimkitError::NotAuthenticated);
        };
        let result = client
            .get(format!("{}{}", self.endpoint_url, endpoint))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }

    /// All installations on the account. Empty when the call fails or the body is not a list.
    pub async fn get_sites(&self) -> Vec<Site> {
        match self.get::<Value>("/all_installations").await {
            Ok(body) => parse_list(body, "site"),
            Err(e) => {
                warn!("Failed to list Climkit sites: {}", e);
                Vec::new()
            }
        }
    }

    /// Identifier of the first installation, if there is one
    pub async fn get_site_id(&self) -> Option<String> {
        self.get_sites()
            .await
            .into_iter()
            .next()
            .map(|site| site.site_id)
    }

    pub async fn get_meter_list(&self, site_id: &str) -> Vec<Meter> {
        match self.get::<Value>(&format!("/meter_info/{site_id}")).await {
            Ok(body) => parse_list(body, "meter"),
            Err(e) => {
                warn!("Failed to list meters for site {}: {}", site_id, e);
                Vec::new()
            }
        }
    }

    pub async fn get_meter_data(&self, site_id: &str, meter_id: &str) -> MeterData {
        match self
            .get::<MeterData>(&format!("/meter_data/{site_id}/{meter_id}"))
            .await
        {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "Failed to read meter {} on site {}: {}",
                    meter_id, site_id, e
                );
                MeterData::default()
            }
        }
    }

    /// Drops the session. Safe to call repeatedly or before `authenticate()`.
    pub fn close(&mut self) {
        self.token = None;
        if self.client.take().is_some() {
            debug!("Closed Climkit session");
        }
    }
}

/// Keeps the well-formed entries of a JSON array, dropping the rest
fn parse_list<T: DeserializeOwned>(body: Value, what: &str) -> Vec<T> {
    let Value::Array(entries) = body else {
        warn!("Expected a list of {}s, got: {}", what, body);
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Skipping malformed {}: {}", what, e);
                None
            }
        })
        .collect()
}
