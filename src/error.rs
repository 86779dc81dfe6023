use thiserror::Error;

/// Errors raised by the risk engine.
///
/// Missing students and thin data are not errors; they degrade to empty
/// results. Only store and boundary failures end up here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("metric snapshot could not be decoded: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("unknown {dimension} level '{value}'")]
    UnknownLevel {
        dimension: &'static str,
        value: String,
    },

    #[error("student {0} does not exist")]
    UnknownStudent(uuid::Uuid),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
