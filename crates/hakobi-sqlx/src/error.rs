/// Categorization of failures that may occur while talking to Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    /// Errors originating from database interactions.
    DataBase,
    /// Errors that happen while decoding stored job rows.
    Decode,
    /// Serialization of an outgoing payload failed.
    Encode,
    /// The worker lost its lease (token mismatch or 0 rows affected).
    LostLease,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl Error {
    pub(crate) fn new_database(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error {
            kind: ErrorKind::DataBase,
            inner: error,
        }
    }

    pub(crate) fn lost_lease() -> Self {
        Error {
            kind: ErrorKind::LostLease,
            inner: Box::new(LostLeaseError),
        }
    }

    pub(crate) fn malformed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            inner: Box::new(MalformedRow(message.into())),
        }
    }

    /// Return the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self {
            kind: ErrorKind::DataBase,
            inner: Box::new(value),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::Encode,
            inner: Box::new(value),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[derive(Debug)]
struct LostLeaseError;

impl std::fmt::Display for LostLeaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("lost lease for job")
    }
}

impl std::error::Error for LostLeaseError {}

#[derive(Debug)]
struct MalformedRow(String);

impl std::fmt::Display for MalformedRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for MalformedRow {}
