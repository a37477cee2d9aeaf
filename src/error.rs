use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// The caller supplied an invalid projection or path specification.
    /// Reported before any tree is built; the message names the offending
    /// path and value.
    InvalidSpecification(String),
    /// A diff buffer failed top-level framing validation (length prefix,
    /// section marker or terminator byte).
    CorruptedDiff(String),
    /// An internal invariant was violated. This indicates a bug in the
    /// caller or in this crate, not a recoverable condition.
    Internal(String),
    Io(io::Error),
    BsonSer(bson::ser::Error),
    BsonDe(bson::de::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSpecification(reason) => write!(f, "Invalid specification: {}", reason),
            Error::CorruptedDiff(reason) => write!(f, "Corrupted diff: {}", reason),
            Error::Internal(reason) => write!(f, "Internal error: {}", reason),
            Error::Io(e) => write!(f, "{}", e),
            Error::BsonSer(e) => write!(f, "{}", e),
            Error::BsonDe(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        Error::BsonSer(err)
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        Error::BsonDe(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
