use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fmt, result,
};

/// Error type shared by the bindings.
///
/// Any `Display` type converts into an `Error`, so ptrace, ELF, I/O and JSON
/// failures all propagate with `?`. The text is kept verbatim so that the
/// dispatcher can embed it in the diagnostic it shows instead of a value.
pub struct Error {
    error: String,
    backtrace: Backtrace,
}

impl Error {
    fn new(error: String) -> Self {
        Self {
            error,
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    /// The error text, exactly as reported by its source.
    pub fn message(&self) -> &str {
        &self.error
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if self.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\nBacktrace:\n{}", self.backtrace)
        } else {
            Ok(())
        }
    }
}

impl<E: fmt::Display> From<E> for Error {
    fn from(e: E) -> Error {
        Error::new(e.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;
