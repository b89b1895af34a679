//! Credential validation and options handling for setting up the bridge.
//!
//! The user step checks a username/password pair against the live API before
//! an entry is created. Failures come back as field-level codes that a form can
//! display next to the inputs.

use crate::climkit_api::ClimkitAPI;
use crate::config;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

pub const ENTRY_TITLE: &str = "Climkit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigEntry {
    pub title: String,
    pub data: UserInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    NoSites,
    AuthFailed,
}

impl FlowError {
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::NoSites => "no_sites",
            FlowError::AuthFailed => "auth_failed",
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for FlowError {}

/// Logs in with the submitted credentials and checks the account has a site
pub async fn step_user(api_url: &str, input: UserInput) -> Result<ConfigEntry, FlowError> {
    let mut api = ClimkitAPI::new(api_url, input.username.as_str(), input.password.as_str());

    let outcome = match api.authenticate().await {
        Err(e) => {
            warn!("Rejecting credentials for {}: {}", input.username, e);
            Err(FlowError::AuthFailed)
        }
        Ok(()) => match api.get_site_id().await {
            None => Err(FlowError::NoSites),
            Some(site_id) => {
                info!("Credentials for {} valid, first site {}", input.username, site_id);
                Ok(())
            }
        },
    };
    api.close();

    outcome.map(|()| ConfigEntry {
        title: ENTRY_TITLE.to_string(),
        data: input,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsInput {
    #[serde(default)]
    pub scan_interval: Option<u64>,
}

/// Validates the options form's `scan_interval` and resolves it into the polling period,
/// five minutes when left blank. It goes through the same parser as `SCAN_INTERVAL`, so an
/// accepted option is exactly the value [`crate::config::Settings::scan_interval`] polls at.
pub fn step_options(input: &OptionsInput) -> Result<Duration, crate::errors::ClimkitError> {
    let minutes = input.scan_interval.map(|minutes| minutes.to_string());
    config::scan_interval(minutes.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> UserInput {
        UserInput {
            username: "user".to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_step_user_creates_entry() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/auth")
            .with_status(200)
            .with_body(r#"{"token": "t"}"#)
            .create_async()
            .await;
        let _sites = server
            .mock("GET", "/all_installations")
            .with_status(200)
            .with_body(r#"[{"site_id": "s1"}]"#)
            .create_async()
            .await;

        let entry = step_user(&server.url(), input()).await.unwrap();
        assert_eq!(entry.title, "Climkit");
        assert_eq!(entry.data, input());
    }

    #[tokio::test]
    async fn test_step_user_auth_failed() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/auth")
            .with_status(401)
            .create_async()
            .await;

        let err = step_user(&server.url(), input()).await.unwrap_err();
        assert_eq!(err, FlowError::AuthFailed);
        assert_eq!(err.code(), "auth_failed");
    }

    #[tokio::test]
    async fn test_step_user_unreachable_is_auth_failed() {
        let err = step_user("http://127.0.0.1:9", input()).await.unwrap_err();
        assert_eq!(err, FlowError::AuthFailed);
    }

    #[tokio::test]
    async fn test_step_user_no_sites() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/auth")
            .with_status(200)
            .with_body(r#"{"token": "t"}"#)
            .create_async()
            .await;
        let _sites = server
            .mock("GET", "/all_installations")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let err = step_user(&server.url(), input()).await.unwrap_err();
        assert_eq!(err.code(), "no_sites");
    }

    #[test]
    fn test_step_options() {
        assert_eq!(
            step_options(&OptionsInput::default()).unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(
            step_options(&OptionsInput {
                scan_interval: Some(10)
            })
            .unwrap(),
            Duration::from_secs(600)
        );
        assert!(step_options(&OptionsInput {
            scan_interval: Some(0)
        })
        .is_err());
        assert!(step_options(&OptionsInput {
            scan_interval: Some(u64::MAX)
        })
        .is_err());

        // Same answer as the environment path
        assert_eq!(
            step_options(&OptionsInput {
                scan_interval: Some(15)
            })
            .unwrap(),
            config::scan_interval(Some("15")).unwrap()
        );
    }
}
