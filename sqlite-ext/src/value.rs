//!
//! Read-only views over engine-owned argument values.
//!
//! A `Value` borrows a `sqlite3_value` that the engine owns for the
//! duration of one callback; nothing here copies unless the caller asks.
//! `Values` is the argument vector handed to function and virtual table
//! callbacks.
//!

use std::ffi::c_int;
use std::marker::PhantomData;

use rusqlite::ffi;

use crate::error::{Error, Result};

/// Fundamental SQLite datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteType {
    Null,
    Integer,
    Float,
    Text,
    Blob,
}

impl SqliteType {
    fn from_code(code: c_int) -> SqliteType {
        match code {
            ffi::SQLITE_INTEGER => SqliteType::Integer,
            ffi::SQLITE_FLOAT => SqliteType::Float,
            ffi::SQLITE_TEXT => SqliteType::Text,
            ffi::SQLITE_BLOB => SqliteType::Blob,
            _ => SqliteType::Null,
        }
    }
}

/// Borrowed view of a single engine value. Valid only for the duration of
/// the callback that received it.
pub struct Value<'a> {
    ptr: *mut ffi::sqlite3_value,
    _marker: PhantomData<&'a ffi::sqlite3_value>,
}

impl<'a> Value<'a> {
    pub(crate) unsafe fn from_raw(ptr: *mut ffi::sqlite3_value) -> Value<'a> {
        Value {
            ptr,
            _marker: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> *mut ffi::sqlite3_value {
        self.ptr
    }

    pub fn value_type(&self) -> SqliteType {
        SqliteType::from_code(unsafe { ffi::sqlite3_value_type(self.ptr) })
    }

    pub fn is_null(&self) -> bool {
        self.value_type() == SqliteType::Null
    }

    /// Integer rendition of the value, applying the engine's coercions.
    pub fn as_i64(&self) -> i64 {
        unsafe { ffi::sqlite3_value_int64(self.ptr) }
    }

    pub fn as_f64(&self) -> f64 {
        unsafe { ffi::sqlite3_value_double(self.ptr) }
    }

    /// Text rendition, `None` for SQL NULL. Fails if the engine's bytes
    /// are not valid UTF-8.
    pub fn as_str(&self) -> Result<Option<&'a str>> {
        let ptr = unsafe { ffi::sqlite3_value_text(self.ptr) };
        if ptr.is_null() {
            return Ok(None);
        }
        let len = unsafe { ffi::sqlite3_value_bytes(self.ptr) } as usize;
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Error::Message(format!("invalid utf-8 in sqlite text value: {e}")))
    }

    /// Blob rendition, `None` for SQL NULL. A zero-length blob comes back
    /// as an empty slice, distinct from NULL.
    pub fn as_blob(&self) -> Option<&'a [u8]> {
        let ptr = unsafe { ffi::sqlite3_value_blob(self.ptr) };
        if !ptr.is_null() {
            let len = unsafe { ffi::sqlite3_value_bytes(self.ptr) } as usize;
            Some(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) })
        } else if self.value_type() != SqliteType::Null {
            Some(&[])
        } else {
            None
        }
    }

    /// True inside `update` when this column's value is unchanged from
    /// the stored row.
    pub fn no_change(&self) -> bool {
        unsafe { ffi::sqlite3_value_nochange(self.ptr) != 0 }
    }
}

/// Argument vector of a callback.
pub struct Values<'a> {
    args: &'a [*mut ffi::sqlite3_value],
}

impl<'a> Values<'a> {
    pub(crate) unsafe fn from_raw(argv: *mut *mut ffi::sqlite3_value, argc: c_int) -> Values<'a> {
        let args = if argc > 0 && !argv.is_null() {
            unsafe { std::slice::from_raw_parts(argv, argc as usize) }
        } else {
            &[]
        };
        Values { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Panics when `index` is out of bounds; the engine always passes the
    /// declared argument count.
    pub fn get(&self, index: usize) -> Value<'a> {
        assert!(
            index < self.args.len(),
            "argument index {index} out of bounds ({} arguments)",
            self.args.len()
        );
        unsafe { Value::from_raw(self.args[index]) }
    }

    pub fn iter(&self) -> impl Iterator<Item = Value<'a>> + '_ {
        self.args.iter().map(|&ptr| unsafe { Value::from_raw(ptr) })
    }
}
