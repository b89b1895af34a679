use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClimkitError {
    #[error("Climkit authentication failed with status {status}")]
    Authentication { status: u16 },

    #[error("Climkit authentication response carried no token")]
    MissingToken,

    #[error("Not authenticated against Climkit")]
    NotAuthenticated,

    #[error("No sites found")]
    NoSites,

    #[error("No meters found on any of {sites} site(s)")]
    NoMeters { sites: usize },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ClimkitResult<T> = Result<T, ClimkitError>;
