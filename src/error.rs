use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error, one variant per pipeline stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Illegal character or unterminated string in the SQL text.
    #[error("lexical error: {msg} at line {line}, column {column}")]
    Lexical {
        msg: String,
        line: usize,
        column: usize,
    },

    /// Unexpected or missing token.
    #[error("syntax error: {msg} at line {line}, column {column}")]
    Syntax {
        msg: String,
        line: usize,
        column: usize,
    },

    /// Catalog or type validation failure during analysis.
    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),

    /// Constraint violation during DML.
    #[error("constraint violation: {0}")]
    Constraint(#[from] ConstraintError),

    /// Storage layer failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Runtime failure in the execution engine.
    #[error("execution error: {0}")]
    Execution(#[from] ExecError),
}

/// Semantic analysis errors.
#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("column '{column}' does not exist in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("invalid default for column '{column}': {msg}")]
    InvalidDefault { column: String, msg: String },

    #[error("ambiguous reference '{0}'")]
    AmbiguousReference(String),

    #[error("index '{0}' already exists")]
    IndexExists(String),

    #[error("index '{0}' does not exist")]
    IndexNotFound(String),
}

/// Constraint violations. These abort the statement and leave the table unchanged.
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("unique violation on column '{column}' (value {value})")]
    UniqueViolation { column: String, value: String },

    #[error("primary key violation on column '{column}' (value {value})")]
    PrimaryKeyViolation { column: String, value: String },

    #[error("column '{0}' may not be null")]
    NotNullViolation(String),

    #[error("value for column '{column}' exceeds maximum length {max}")]
    DataTooLong { column: String, max: usize },
}

/// Storage engine errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record does not fit on the page. Recovered internally by page allocation.
    #[error("page is full")]
    PageFull,

    #[error("no unpinned buffer frames available")]
    NoFramesAvailable,

    #[error("catalog is corrupt: {0}")]
    CatalogCorrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Execution engine errors. Partial output is discarded.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("unknown instruction: {0}")]
    UnknownInstruction(String),

    #[error("no table open for {0}")]
    NoOpenTable(&'static str),
}

impl Error {
    /// Construct a lexical error at the given position.
    pub fn lexical(msg: impl Into<String>, line: usize, column: usize) -> Error {
        Error::Lexical {
            msg: msg.into(),
            line,
            column,
        }
    }

    /// Construct a syntax error at the given position.
    pub fn syntax(msg: impl Into<String>, line: usize, column: usize) -> Error {
        Error::Syntax {
            msg: msg.into(),
            line,
            column,
        }
    }
}
