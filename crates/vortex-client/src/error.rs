use std::time::Duration;

use thiserror::Error;
use vortex_gateway::GatewayError;
use vortex_types::validation::ValidationError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found")]
    NotFound,

    #[error("Not signed in")]
    SignedOut,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
