//!
//! Result context for function and column callbacks.
//!
//! Wraps `sqlite3_context`. Text and blob results are handed over with
//! the transient destructor, so the engine copies them before the
//! callback's borrow ends.
//!

use std::ffi::c_int;

use rusqlite::ffi;

use crate::value::Value;

pub struct Context {
    ctx: *mut ffi::sqlite3_context,
}

impl Context {
    pub(crate) fn new(ctx: *mut ffi::sqlite3_context) -> Context {
        Context { ctx }
    }

    pub fn set_null(&mut self) {
        unsafe { ffi::sqlite3_result_null(self.ctx) };
    }

    pub fn set_i64(&mut self, value: i64) {
        unsafe { ffi::sqlite3_result_int64(self.ctx, value) };
    }

    pub fn set_f64(&mut self, value: f64) {
        unsafe { ffi::sqlite3_result_double(self.ctx, value) };
    }

    pub fn set_text(&mut self, value: &str) {
        unsafe {
            ffi::sqlite3_result_text(
                self.ctx,
                value.as_ptr().cast(),
                value.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            );
        }
    }

    pub fn set_blob(&mut self, value: &[u8]) {
        unsafe {
            ffi::sqlite3_result_blob(
                self.ctx,
                value.as_ptr().cast(),
                value.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            );
        }
    }

    /// Zero-filled blob of `len` bytes, produced without materializing it.
    pub fn set_zeroblob(&mut self, len: i32) {
        unsafe { ffi::sqlite3_result_zeroblob(self.ctx, len) };
    }

    /// Copy an argument value through unchanged, preserving its datatype.
    pub fn set_value(&mut self, value: &Value<'_>) {
        unsafe { ffi::sqlite3_result_value(self.ctx, value.raw()) };
    }

    /// True inside `column` when the engine is fetching this column only
    /// to pass it to `update` and would accept "unchanged". The callback
    /// may then skip producing a result.
    pub fn no_change(&self) -> bool {
        unsafe { ffi::sqlite3_vtab_nochange(self.ctx) != 0 }
    }
}
