/// Domain-level failures for marketplace commands.
///
/// The HTTP layer maps these onto status codes; keeping the taxonomy here
/// means every guard holds for every caller, not just the REST handlers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed or missing input (empty field, non-positive price, ...)
    #[error("{0}")]
    Validation(String),

    /// The actor lacks rights for the requested mutation
    #[error("{0}")]
    Authorization(String),

    /// The operation is illegal in the entity's current state
    #[error("{0}")]
    State(String),

    /// The referenced entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// The backing store failed or was unreachable
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The connection lock was poisoned
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Convenience type alias.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// True when the underlying SQLite error is a UNIQUE/constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}
