pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Misuse of the API: operations on a panicked or unopened logger, bad
    /// flags, out-of-range sizes.
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    /// A log file ended in the middle of a record.
    #[error("log truncated")]
    Truncated,
    /// Bad magic, version, checksum or framing.
    #[error("bad log format")]
    BadFormat,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("out of memory")]
    OutOfMemory,
}

impl Error {
    /// OS errno carried by this error, if any. Captured by the logger when it
    /// panics so the original failure stays observable.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
