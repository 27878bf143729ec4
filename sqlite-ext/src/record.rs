//!
//! Host records for the virtual table protocol.
//!
//! SQLite requires `xConnect` and `xOpen` to hand back structs it can
//! treat as `sqlite3_vtab` / `sqlite3_vtab_cursor`. Each record starts
//! with the engine's header and carries the registry token of the managed
//! object behind it. Records live in engine memory (`sqlite3_malloc64`)
//! because the engine may outlive any particular callback frame, and are
//! released with `sqlite3_free` in the matching teardown callback.
//!

use rusqlite::ffi;

#[repr(C)]
pub(crate) struct VTabRecord {
    pub base: ffi::sqlite3_vtab,
    pub token: usize,
}

#[repr(C)]
pub(crate) struct CursorRecord {
    pub base: ffi::sqlite3_vtab_cursor,
    pub token: usize,
}

/// Zeroed engine-memory allocation for a host record. The engine header
/// must be zero-initialized before SQLite sees it. Returns NULL when the
/// engine is out of memory.
pub(crate) unsafe fn allocate<T>() -> *mut T {
    let size = std::mem::size_of::<T>();
    let ptr = unsafe { ffi::sqlite3_malloc64(size as u64) }.cast::<T>();
    if !ptr.is_null() {
        unsafe { std::ptr::write_bytes(ptr.cast::<u8>(), 0, size) };
    }
    ptr
}

pub(crate) unsafe fn release<T>(ptr: *mut T) {
    unsafe { ffi::sqlite3_free(ptr.cast()) };
}
