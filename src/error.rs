//! Translation between Rust failures and SQLite's `(code, message)` convention.
//!
//! User code signals failure either by returning an [`Error`] or by panicking.
//! Both are converted into an [`ErrorInfo`] at the trampoline boundary before
//! control returns to SQLite.
use std::any::Any;
use std::ffi::{CStr, NulError};
use std::fmt;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::str::Utf8Error;

use thiserror::Error;

use crate::sqlite3_raw::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// An allocation through SQLite's allocator failed.
    #[error("out of memory")]
    OutOfMemory,
    /// A string or blob exceeded what SQLite accepts.
    #[error("string or blob too big")]
    TooBig,
    /// A column index outside the declared schema.
    #[error("column index {index} out of range for {count} columns")]
    Range { index: c_int, count: c_int },
    /// A protocol precondition was violated.
    #[error("{0}")]
    Misuse(String),
    /// The table refuses a mutation.
    #[error("{0}")]
    ReadOnly(String),
    /// An explicit SQLite result code, passed through verbatim.
    #[error("{}", describe(.code, .message))]
    Sqlite { code: c_int, message: Option<String> },
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] Utf8Error),
    #[error("string contains an interior NUL byte: {0}")]
    Nul(#[from] NulError),
    /// User code panicked inside a callback.
    #[error("panic in virtual table callback: {0}")]
    Panic(String),
    #[error("{0}")]
    Other(String),
}

/// The foreign representation of a failure.
///
/// `code` is never `SQLITE_OK`. `message` is `None` only where SQLite does not
/// expect one (allocation failure) or none was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: c_int,
    pub message: Option<String>,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(&self.code, &self.message))
    }
}

fn describe(code: &c_int, message: &Option<String>) -> String {
    match message {
        Some(message) => message.clone(),
        None => error_string(*code),
    }
}

/// SQLite's English description of a result code.
pub fn error_string(code: c_int) -> String {
    let text = unsafe { sqlite3_errstr(code) };
    if text.is_null() {
        format!("SQLite error {}", code)
    } else {
        unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
    }
}

impl Error {
    pub fn misuse<S: Into<String>>(message: S) -> Error {
        Error::Misuse(message.into())
    }

    pub fn range(index: c_int, count: c_int) -> Error {
        Error::Range { index, count }
    }

    pub fn sqlite<S: Into<String>>(code: c_int, message: S) -> Error {
        Error::Sqlite { code, message: Some(message.into()) }
    }

    /// Rebuild a host-side error from a foreign result code.
    pub fn from_code(code: c_int, message: Option<String>) -> Error {
        match (code & 0xff, message) {
            (SQLITE_NOMEM, _) => Error::OutOfMemory,
            (SQLITE_TOOBIG, _) => Error::TooBig,
            (SQLITE_MISUSE, Some(message)) => Error::Misuse(message),
            (_, message) => Error::Sqlite { code, message },
        }
    }

    /// Like [`Error::from_code`], taking the message from the connection.
    ///
    /// # Safety
    /// `db` must be a valid connection handle or null.
    pub unsafe fn from_connection(code: c_int, db: *mut sqlite3) -> Error {
        let message = if db.is_null() {
            None
        } else {
            let text = sqlite3_errmsg(db);
            (!text.is_null()).then(|| CStr::from_ptr(text).to_string_lossy().into_owned())
        };
        Error::from_code(code, message)
    }

    /// The result code SQLite will see.
    pub fn code(&self) -> c_int {
        match self {
            Error::OutOfMemory => SQLITE_NOMEM,
            Error::TooBig => SQLITE_TOOBIG,
            Error::Range { .. } => SQLITE_RANGE,
            Error::Misuse(_) => SQLITE_MISUSE,
            Error::ReadOnly(_) => SQLITE_READONLY,
            Error::Sqlite { code, .. } => *code,
            Error::Utf8(_) | Error::Nul(_) | Error::Panic(_) | Error::Other(_) => SQLITE_ERROR,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        let message = match self {
            Error::OutOfMemory => None,
            Error::Sqlite { message, .. } => message.clone(),
            other => Some(other.to_string()),
        };
        ErrorInfo { code: self.code(), message }
    }
}

impl From<ErrorInfo> for Error {
    fn from(info: ErrorInfo) -> Error {
        Error::from_code(info.code, info.message)
    }
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> ErrorInfo {
        err.info()
    }
}

/// Run a user callback, turning a panic into [`Error::Panic`].
pub(crate) fn catch<R, F>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::Panic(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
