use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Failure kinds shared by every layer of the storage core.
///
/// Iterators never signal exhaustion through an error; a scan that runs off
/// the end simply stops yielding items.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("out of space: {0}")]
    OutOfSpace(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt: {0}")]
    Corrupt(String),
}
