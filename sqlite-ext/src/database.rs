//!
//! Connection façade.
//!
//! `Database` wraps a rusqlite `Connection` and adds the extension
//! surface: virtual table modules, scalar and aggregate functions, and
//! the update hook. Statement and query APIs come from the wrapped
//! connection through `Deref`, so `execute`, `prepare`, `query_row` and
//! friends work directly on a `Database`.
//!

use std::ffi::{c_char, c_int, c_void, CStr};
use std::ops::Deref;
use std::path::Path;
use std::sync::{LazyLock, Mutex};

use rusqlite::ffi;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::function::{register_aggregate, register_scalar, AggregateFunction, ScalarFunction};
use crate::handle::HandleTable;
use crate::vtab::{register_module, Module};

/// Row change kind reported to the update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Insert,
    Delete,
    Update,
}

type UpdateHook = dyn FnMut(UpdateAction, &str, &str, i64) + 'static;

static HOOKS: LazyLock<Mutex<HandleTable<UpdateHook>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        Ok(Database {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Database> {
        Ok(Database {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Database {
        Database { conn }
    }

    fn handle(&self) -> *mut ffi::sqlite3 {
        unsafe { self.conn.handle() }
    }

    /// Register an eponymous virtual table module: usable directly as a
    /// table-valued function, with no `CREATE VIRTUAL TABLE` surface.
    pub fn create_module(&self, name: &str, module: impl Module) -> Result<()> {
        register_module(self.handle(), name, Box::new(module), false)
    }

    /// Register a module whose tables are created with
    /// `CREATE VIRTUAL TABLE` and may support updates, rename and the
    /// transaction callbacks.
    pub fn create_persistent_module(&self, name: &str, module: impl Module) -> Result<()> {
        register_module(self.handle(), name, Box::new(module), true)
    }

    pub fn create_scalar_function(
        &self,
        name: &str,
        n_arg: i32,
        function: impl ScalarFunction,
    ) -> Result<()> {
        register_scalar(self.handle(), name, n_arg, Box::new(function))
    }

    pub fn create_aggregate_function(
        &self,
        name: &str,
        n_arg: i32,
        function: impl AggregateFunction,
    ) -> Result<()> {
        register_aggregate(self.handle(), name, n_arg, Box::new(function))
    }

    /// Install a callback observing every row change on this connection.
    /// Replaces any previously installed hook.
    pub fn set_update_hook(&self, hook: impl FnMut(UpdateAction, &str, &str, i64) + 'static) {
        let token = HOOKS.lock().unwrap().create(Box::new(hook));
        let previous = unsafe {
            ffi::sqlite3_update_hook(self.handle(), Some(update_hook), token as *mut c_void)
        };
        if !previous.is_null() {
            drop(HOOKS.lock().unwrap().dispose(previous as usize));
        }
    }

    pub fn clear_update_hook(&self) {
        let previous =
            unsafe { ffi::sqlite3_update_hook(self.handle(), None, std::ptr::null_mut()) };
        if !previous.is_null() {
            drop(HOOKS.lock().unwrap().dispose(previous as usize));
        }
    }

    /// Prepare `sql` and run `f` over the statement.
    pub fn with_statement<T>(
        &self,
        sql: &str,
        f: impl FnOnce(&mut rusqlite::Statement<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut stmt = self.conn.prepare(sql)?;
        f(&mut stmt)
    }

    /// Close the connection, reporting any engine error. An installed
    /// update hook is cleared first; a `Database` dropped without `close`
    /// leaks its hook closure.
    pub fn close(self) -> Result<()> {
        self.clear_update_hook();
        self.conn.close().map_err(|(_, e)| Error::from(e))
    }
}

impl Deref for Database {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

unsafe extern "C" fn update_hook(
    user_data: *mut c_void,
    action: c_int,
    db_name: *const c_char,
    table_name: *const c_char,
    rowid: ffi::sqlite3_int64,
) {
    let action = match action {
        ffi::SQLITE_INSERT => UpdateAction::Insert,
        ffi::SQLITE_DELETE => UpdateAction::Delete,
        _ => UpdateAction::Update,
    };
    let db_name = unsafe { CStr::from_ptr(db_name) }.to_string_lossy();
    let table_name = unsafe { CStr::from_ptr(table_name) }.to_string_lossy();
    let hook = unsafe { &mut *HOOKS.lock().unwrap().resolve(user_data as usize) };
    hook(action, &db_name, &table_name, rowid);
}

/// Open a database, run `f`, and close it even when `f` fails.
pub fn with_database<T>(path: impl AsRef<Path>, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
    let db = Database::open(path)?;
    let outcome = f(&db);
    let closed = db.close();
    let value = outcome?;
    closed?;
    Ok(value)
}

/// `with_database` over a fresh in-memory database.
pub fn with_memory_database<T>(f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
    let db = Database::open_in_memory()?;
    let outcome = f(&db);
    let closed = db.close();
    let value = outcome?;
    closed?;
    Ok(value)
}
