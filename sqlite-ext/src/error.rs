//!
//! Error taxonomy and the status translation layer.
//!
//! Three kinds of failure cross this crate:
//! - `Error::Engine` / `Error::Sqlite`: a non-OK status returned by SQLite
//!   at a bridge call site, carrying the engine's current error text.
//! - Application errors (`Error::Message` and friends) raised inside a
//!   virtual table or function callback. Trampolines catch these and hand
//!   them back to the engine as a status code plus an engine-allocated
//!   message. They never unwind through SQLite's frames.
//! - Bridge invariant violations (use of a disposed handle) are defects,
//!   not errors, and panic. A panic at the extern "C" boundary aborts.
//!

use std::ffi::{c_char, c_int, CStr};

use rusqlite::ffi;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Non-OK status from a direct engine call, with the connection's
    /// error message at the time of failure.
    #[error("sqlite error {code}: {message}")]
    Engine { code: c_int, message: String },

    /// Failure reported by the rusqlite statement layer.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Failure raised by application code inside a callback.
    #[error("{0}")]
    Message(String),

    /// The virtual table does not implement `update`.
    #[error("virtual table is read-only")]
    ReadOnly,

    #[error("string passed to sqlite contains a NUL byte")]
    Nul(#[from] std::ffi::NulError),
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Message(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Message(message.to_owned())
    }
}

impl Error {
    /// Status code reported to the engine when this error crosses a
    /// trampoline boundary.
    pub(crate) fn engine_code(&self) -> c_int {
        match self {
            Error::Engine { code, .. } => *code,
            Error::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => e.extended_code,
            Error::ReadOnly => ffi::SQLITE_READONLY,
            _ => ffi::SQLITE_ERROR,
        }
    }
}

/// Current error message of a connection.
pub(crate) unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    let msg = unsafe { ffi::sqlite3_errmsg(db) };
    if msg.is_null() {
        String::from("unknown sqlite error")
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

/// Map a status code from a direct engine call into a `Result`, picking up
/// the connection's error message on failure.
pub(crate) unsafe fn check(db: *mut ffi::sqlite3, code: c_int) -> Result<()> {
    if code == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(Error::Engine {
            code,
            message: unsafe { errmsg(db) },
        })
    }
}

/// Copy a message into memory owned by the engine's allocator. Ownership
/// of the returned pointer passes to SQLite, which frees it with
/// `sqlite3_free`. Returns NULL when the engine is out of memory.
pub(crate) unsafe fn engine_string(s: &str) -> *mut c_char {
    let len = s.len();
    let ptr = unsafe { ffi::sqlite3_malloc64(len as u64 + 1) }.cast::<c_char>();
    if ptr.is_null() {
        return ptr;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(s.as_ptr().cast::<c_char>(), ptr, len);
        *ptr.add(len) = 0;
    }
    ptr
}

/// Record an application error on a virtual table's `zErrMsg` slot and
/// return the status code for the trampoline. A previously set message is
/// released first.
pub(crate) unsafe fn set_vtab_error(vtab: *mut ffi::sqlite3_vtab, err: &Error) -> c_int {
    tracing::trace!(error = %err, "virtual table callback failed");
    unsafe {
        if !(*vtab).zErrMsg.is_null() {
            ffi::sqlite3_free((*vtab).zErrMsg.cast());
        }
        (*vtab).zErrMsg = engine_string(&err.to_string());
    }
    err.engine_code()
}

/// Report an application error through a function/column result context.
pub(crate) unsafe fn result_error(ctx: *mut ffi::sqlite3_context, err: &Error) {
    tracing::trace!(error = %err, "function callback failed");
    if err.engine_code() == ffi::SQLITE_NOMEM {
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    }
    let message = err.to_string();
    unsafe {
        ffi::sqlite3_result_error(ctx, message.as_ptr().cast(), message.len() as c_int);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_code_defaults_to_error() {
        let err = Error::Message("boom".into());
        assert_eq!(err.engine_code(), ffi::SQLITE_ERROR);
    }

    #[test]
    fn test_read_only_maps_to_readonly_status() {
        assert_eq!(Error::ReadOnly.engine_code(), ffi::SQLITE_READONLY);
    }

    #[test]
    fn test_message_display_preserves_text() {
        let err: Error = "custom failure".into();
        assert_eq!(err.to_string(), "custom failure");
    }
}
