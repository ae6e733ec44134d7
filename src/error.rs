use uuid::Uuid;

/// Typed error surface for the monitoring core.
///
/// Background loops (`Simulator`, `Monitor`) treat [`CoreError::CycleError`]
/// and [`CoreError::StoreTransient`] as recoverable: they are recorded on the
/// service's status and the loop continues. [`CoreError::StoreFatal`] ends
/// the loop. All other variants are returned directly from one-shot
/// operations (`start`, `stop`, `compute_baseline`, queries).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("network not found: {0}")]
    NetworkNotFound(Uuid),

    #[error("baseline not computed for network {0}")]
    BaselineMissing(Uuid),

    #[error("baseline already computed for network {0}")]
    AlreadyComputed(Uuid),

    #[error("service already running")]
    AlreadyRunning,

    #[error("service not running")]
    NotRunning,

    #[error("hydraulic engine failed to load network definition: {0}")]
    EngineLoadError(String),

    #[error("hydraulic engine failed to solve: {0}")]
    SolveError(String),

    #[error("transient store error: {0}")]
    StoreTransient(#[source] anyhow::Error),

    #[error("fatal store error: {0}")]
    StoreFatal(#[source] anyhow::Error),

    #[error("monitoring cycle error: {0}")]
    CycleError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Classifies a `sqlx::Error` the way the store adapter needs to: connection
/// loss and pool timeouts are transient (retry next cycle is fine), anything
/// else (constraint violation, protocol mismatch, pool closed) is fatal.
pub fn classify_sqlx_error(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            CoreError::StoreTransient(anyhow::Error::new(err))
        }
        sqlx::Error::Database(db_err) => {
            // connection_exception / connection_failure class (PostgreSQL 08xxx)
            if db_err.code().is_some_and(|c| c.starts_with("08")) {
                CoreError::StoreTransient(anyhow::Error::new(err))
            } else {
                CoreError::StoreFatal(anyhow::Error::new(err))
            }
        }
        _ => CoreError::StoreFatal(anyhow::Error::new(err)),
    }
}
