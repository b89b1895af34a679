use crate::climkit_api::DEFAULT_API_URL;
use crate::errors::{ClimkitError, ClimkitResult};
use std::env;
use std::time::Duration;

pub const DEFAULT_SCAN_INTERVAL_MINUTES: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub username: String,
    pub password: String,
    pub api_url: String,
    pub ha_url: String,
    pub ha_token: String,
    pub scan_interval: Duration,
}

impl Settings {
    pub fn from_env() -> ClimkitResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup, `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClimkitResult<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ClimkitError::Config(format!("{key} must be set")))
        };

        Ok(Self {
            username: required("CLIMKIT_USERNAME")?,
            password: required("CLIMKIT_PASSWORD")?,
            api_url: lookup("CLIMKIT_API_URL")
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            ha_url: required("HA_URL")?,
            ha_token: lookup("HA_TOKEN").unwrap_or_default(),
            scan_interval: scan_interval(lookup("SCAN_INTERVAL").as_deref())?,
        })
    }
}

/// Parses a poll period given in whole minutes, defaulting to five
pub fn scan_interval(minutes: Option<&str>) -> ClimkitResult<Duration> {
    let minutes = match minutes.map(str::trim) {
        None | Some("") => DEFAULT_SCAN_INTERVAL_MINUTES,
        Some(raw) => raw.parse::<u64>().map_err(|e| {
            ClimkitError::Config(format!("SCAN_INTERVAL '{raw}' is not a whole number: {e}"))
        })?,
    };
    if minutes == 0 {
        return Err(ClimkitError::Config(
            "SCAN_INTERVAL must be at least one minute".to_string(),
        ));
    }
    let seconds = minutes.checked_mul(60).ok_or_else(|| {
        ClimkitError::Config(format!("SCAN_INTERVAL of {minutes} minutes is too large"))
    })?;
    Ok(Duration::from_secs(seconds))
}
