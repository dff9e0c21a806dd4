use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn from_query(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Row decoding helpers
// ---------------------------------------------------------------------------

pub(crate) fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn parse_time(
    idx: usize,
    s: &str,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn parse_peer(idx: usize, s: &str) -> rusqlite::Result<skein_shared::PeerId> {
    skein_shared::PeerId::from_hex(s).map_err(|e| conversion(idx, e))
}

pub(crate) fn parse_hash(idx: usize, s: &str) -> rusqlite::Result<skein_shared::BlockHash> {
    skein_shared::BlockHash::from_hex(s).map_err(|e| conversion(idx, e))
}
