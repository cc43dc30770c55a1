use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("validation error: {0}")]
    Validation(String),
    /// Unique or foreign-key constraint rejected the write.
    #[error("constraint violation: {0}")]
    Conflict(String),
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Db(String),
}

impl From<DbErr> for ModelError {
    fn from(e: DbErr) -> Self {
        match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) | Some(SqlErr::ForeignKeyConstraintViolation(msg)) => {
                return ModelError::Conflict(msg);
            }
            _ => {}
        }
        match e {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => ModelError::Unavailable(e.to_string()),
            other => ModelError::Db(other.to_string()),
        }
    }
}
