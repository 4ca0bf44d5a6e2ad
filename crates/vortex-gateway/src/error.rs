use thiserror::Error;
use vortex_db::SchemaError;
use vortex_types::Table;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown column {table}.{column}")]
    UnknownColumn { table: Table, column: String },

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Background task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Classify an error coming out of the store.
    pub fn from_store(err: anyhow::Error) -> Self {
        if let Some(schema) = err.downcast_ref::<SchemaError>() {
            return match schema {
                SchemaError::UnknownColumn { table, column } => GatewayError::UnknownColumn {
                    table: *table,
                    column: column.clone(),
                },
                other => GatewayError::InvalidRow(other.to_string()),
            };
        }

        if let Some(rusqlite::Error::SqliteFailure(failure, message)) =
            err.downcast_ref::<rusqlite::Error>()
        {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                return GatewayError::Conflict(
                    message.clone().unwrap_or_else(|| "constraint violation".into()),
                );
            }
        }

        GatewayError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InvalidRow(err.to_string())
    }
}
