use sea_orm::error::DbErr;
use serde::Serialize;

use crate::models::{AssignCursor, ShipmentId};

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Injected failure for shipment {0}")]
    InjectedFailure(ShipmentId),

    #[error("Sweep cursor is no longer at {}..{}", .0.next_id, .0.last_id)]
    CursorMoved(AssignCursor),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a database error, mapping connection-level failures to
    /// `StoreUnavailable` so triggers can tell them apart from row-level errors.
    pub fn db_error(err: DbErr) -> Self {
        match err {
            DbErr::ConnectionAcquire(e) => ServiceError::StoreUnavailable(e.to_string()),
            DbErr::Conn(e) => ServiceError::StoreUnavailable(e.to_string()),
            other => ServiceError::DatabaseError(other),
        }
    }

    /// Connectivity failures abort a whole run; everything else is scoped to
    /// the shipment that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::StoreUnavailable(_) | ServiceError::ConfigError(_)
        )
    }
}
