use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database '{0}' already exists")]
    DatabaseExists(String),

    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Registry not writable: no session in progress")]
    RegistryNotWritable,

    #[error("Registry already in a session")]
    AlreadyInSession,

    #[error("Idempotency key mismatch: expected {expected}, got {got}")]
    IdempotencyKeyMismatch { expected: String, got: String },

    #[error("Invalid dataset id '{0}'")]
    InvalidDbid(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Registry is closed")]
    RegistryClosed,

    #[error("Key '{0}' is reserved for commit bookkeeping")]
    ReservedKey(String),

    #[error("Read cancelled: commit in progress")]
    ReadCancelled,

    #[error("Database '{dbid}': {source}")]
    Dataset {
        dbid: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Commit failed: {}", join_errors(.0))]
    Commit(Vec<DbError>),

    #[error("Cancel failed: {}", join_errors(.0))]
    Cancel(Vec<DbError>),

    #[error("Pool for '{0}' is closed")]
    PoolClosed(String),

    #[error("Database file '{0}' is locked by another writer")]
    DatabaseLocked(String),

    #[error("Savepoint already open")]
    SavepointOpen,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Attach the dataset id to a collaborator error.
    pub fn in_dataset(self, dbid: &str) -> Self {
        match self {
            already @ DbError::Dataset { .. } => already,
            other => DbError::Dataset {
                dbid: dbid.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True for `DatabaseNotFound`, looking through dataset context.
    pub fn is_not_found(&self) -> bool {
        match self {
            DbError::DatabaseNotFound(_) => true,
            DbError::Dataset { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The innermost error, with dataset context removed.
    pub fn root(&self) -> &DbError {
        match self {
            DbError::Dataset { source, .. } => source.root(),
            other => other,
        }
    }
}

fn join_errors(errors: &[DbError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DbError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DbError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
