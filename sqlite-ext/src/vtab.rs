//!
//! Virtual table protocol bridge.
//!
//! Tables and cursors are plain trait objects. Registration builds a
//! `sqlite3_module` dispatch table whose entries are the trampolines in
//! this file; each trampoline recovers the registry token from the host
//! record the engine passed back, resolves the object, delegates, and
//! translates the outcome into a status code. Application errors are
//! caught here; they never unwind into engine frames.
//!
//! Lifecycle pairing holds on every path: a table created in
//! `xCreate`/`xConnect` is disposed exactly once in `xDestroy`/
//! `xDisconnect`, a cursor from `xOpen` exactly once in `xClose`, and
//! the registered module itself when the engine runs the aux destructor.
//!

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::sync::{LazyLock, Mutex};

use rusqlite::ffi;

use crate::context::Context;
use crate::error::{check, engine_string, errmsg, result_error, set_vtab_error, Error, Result};
use crate::handle::HandleTable;
use crate::index_info::IndexInfo;
use crate::record::{allocate, release, CursorRecord, VTabRecord};
use crate::value::Values;

/// Factory for virtual tables, registered under a module name.
pub trait Module: 'static {
    /// Build the table object for an existing (or eponymous) table.
    fn connect(&self, db: &mut VTabConnection, args: &[&str]) -> Result<Box<dyn VirtualTable>>;

    /// Build the table object and its persistent state. Invoked once per
    /// `CREATE VIRTUAL TABLE`; defaults to `connect` for modules without
    /// backing state.
    fn create(&self, db: &mut VTabConnection, args: &[&str]) -> Result<Box<dyn VirtualTable>> {
        self.connect(db, args)
    }
}

/// A connected virtual table.
pub trait VirtualTable: 'static {
    /// `CREATE TABLE` statement describing the table's columns, passed to
    /// `sqlite3_declare_vtab` during connect.
    fn declaration(&self) -> String;

    /// Query plan negotiation. Called any number of times per statement;
    /// must be deterministic for identical inputs.
    fn best_index(&self, info: &mut IndexInfo) -> Result<()>;

    fn open(&mut self) -> Result<Box<dyn VTabCursor>>;

    /// Last call before the table object is dropped on disconnect.
    fn disconnect(&mut self) {}

    /// INSERT, UPDATE and DELETE against the table. The default refuses
    /// with a read-only status.
    ///
    /// For a delete, `args` holds a single rowid. For an insert, the
    /// first argument is NULL (or the chosen rowid) followed by one value
    /// per declared column; the returned rowid is reported to the engine.
    /// For an update, the first two arguments are the old and new rowids.
    fn update(&mut self, _args: &Values<'_>) -> Result<i64> {
        Err(Error::ReadOnly)
    }

    /// ALTER TABLE RENAME. Return false to refuse; the statement then
    /// fails and the table keeps its name.
    fn rename(&mut self, _new_name: &str) -> bool {
        false
    }

    /// Drop the table's persistent state. Runs on `DROP TABLE` right
    /// before the table object is disposed.
    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn savepoint(&mut self, _savepoint: i32) -> Result<()> {
        Ok(())
    }

    fn release(&mut self, _savepoint: i32) -> Result<()> {
        Ok(())
    }

    fn rollback_to(&mut self, _savepoint: i32) -> Result<()> {
        Ok(())
    }
}

/// A scan over a virtual table.
pub trait VTabCursor: 'static {
    /// Start (or restart) the scan with the plan chosen by `best_index`
    /// and the constraint values it routed into argument slots.
    fn filter(&mut self, idx_num: i32, idx_str: Option<&str>, args: &Values<'_>) -> Result<()>;

    fn next(&mut self) -> Result<()>;

    fn eof(&self) -> bool;

    /// Produce the value of `column` for the current row through `ctx`.
    fn column(&self, ctx: &mut Context, column: i32) -> Result<()>;

    fn rowid(&self) -> i64;

    /// Last call before the cursor object is dropped.
    fn close(&mut self) {}
}

/// Connection view handed to `connect`/`create`, for setting up shadow
/// tables and other per-table state on the same connection.
pub struct VTabConnection {
    db: *mut ffi::sqlite3,
}

impl VTabConnection {
    pub(crate) fn new(db: *mut ffi::sqlite3) -> VTabConnection {
        VTabConnection { db }
    }

    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        let sql = CString::new(sql)?;
        let mut err: *mut c_char = std::ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_exec(self.db, sql.as_ptr(), None, std::ptr::null_mut(), &mut err)
        };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            let message = if err.is_null() {
                unsafe { errmsg(self.db) }
            } else {
                unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
            };
            unsafe { ffi::sqlite3_free(err.cast()) };
            Err(Error::Engine { code: rc, message })
        }
    }

    /// Raw connection handle, for engine calls this view does not cover.
    pub unsafe fn handle(&mut self) -> *mut ffi::sqlite3 {
        self.db
    }
}

/// A registered module: the factory plus the dispatch table whose address
/// the engine holds for the lifetime of the registration.
struct ModuleRecord {
    module: Box<dyn Module>,
    dispatch: Box<ffi::sqlite3_module>,
}

static MODULES: LazyLock<Mutex<HandleTable<ModuleRecord>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));
static TABLES: LazyLock<Mutex<HandleTable<dyn VirtualTable>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));
static CURSORS: LazyLock<Mutex<HandleTable<dyn VTabCursor>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));

/// Register `module` on a connection. Non-persistent modules omit
/// `xCreate`, which makes them eponymous-only: usable directly as a
/// table-valued function, not through `CREATE VIRTUAL TABLE`. Persistent
/// modules get the full surface including updates, rename and the
/// transaction callbacks.
pub(crate) fn register_module(
    db: *mut ffi::sqlite3,
    name: &str,
    module: Box<dyn Module>,
    persistent: bool,
) -> Result<()> {
    let c_name = CString::new(name)?;

    // The Option<fn> entries left at None stay None under zeroing.
    let mut dispatch: Box<ffi::sqlite3_module> = Box::new(unsafe { std::mem::zeroed() });
    dispatch.iVersion = 2;
    dispatch.xConnect = Some(vtab_connect);
    dispatch.xBestIndex = Some(vtab_best_index);
    dispatch.xDisconnect = Some(vtab_disconnect);
    dispatch.xOpen = Some(vtab_open);
    dispatch.xClose = Some(cursor_close);
    dispatch.xFilter = Some(cursor_filter);
    dispatch.xNext = Some(cursor_next);
    dispatch.xEof = Some(cursor_eof);
    dispatch.xColumn = Some(cursor_column);
    dispatch.xRowid = Some(cursor_rowid);
    if persistent {
        dispatch.xCreate = Some(vtab_create);
        dispatch.xDestroy = Some(vtab_destroy);
        dispatch.xUpdate = Some(vtab_update);
        dispatch.xRename = Some(vtab_rename);
        dispatch.xBegin = Some(vtab_begin);
        dispatch.xSync = Some(vtab_sync);
        dispatch.xCommit = Some(vtab_commit);
        dispatch.xRollback = Some(vtab_rollback);
        dispatch.xSavepoint = Some(vtab_savepoint);
        dispatch.xRelease = Some(vtab_release);
        dispatch.xRollbackTo = Some(vtab_rollback_to);
    }

    let record = Box::new(ModuleRecord { module, dispatch });
    let (token, dispatch_ptr) = {
        let mut modules = MODULES.lock().unwrap();
        let token = modules.create(record);
        let ptr: *const ffi::sqlite3_module = unsafe { &*(*modules.resolve(token)).dispatch };
        (token, ptr)
    };

    tracing::debug!(name, persistent, "registering virtual table module");
    // On failure the engine invokes the aux destructor, which disposes
    // the token.
    let rc = unsafe {
        ffi::sqlite3_create_module_v2(
            db,
            c_name.as_ptr(),
            dispatch_ptr,
            token as *mut c_void,
            Some(module_destroy),
        )
    };
    unsafe { check(db, rc) }
}

unsafe extern "C" fn module_destroy(aux: *mut c_void) {
    MODULES.lock().unwrap().dispose(aux as usize);
}

unsafe fn table_ptr(p_vtab: *mut ffi::sqlite3_vtab) -> *mut dyn VirtualTable {
    let token = unsafe { (*p_vtab.cast::<VTabRecord>()).token };
    TABLES.lock().unwrap().resolve(token)
}

unsafe fn cursor_ptr(p_cursor: *mut ffi::sqlite3_vtab_cursor) -> *mut dyn VTabCursor {
    let token = unsafe { (*p_cursor.cast::<CursorRecord>()).token };
    CURSORS.lock().unwrap().resolve(token)
}

unsafe fn connect_or_create(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
    create: bool,
) -> c_int {
    let module_ptr = MODULES.lock().unwrap().resolve(aux as usize);
    let module = unsafe { &(*module_ptr).module };

    let args: Vec<String> = (0..argc as usize)
        .map(|i| {
            unsafe { CStr::from_ptr(*argv.add(i)) }
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    let mut conn = VTabConnection::new(db);
    let built = if create {
        module.create(&mut conn, &arg_refs)
    } else {
        module.connect(&mut conn, &arg_refs)
    };
    let table = match built {
        Ok(table) => table,
        Err(e) => {
            unsafe { *pz_err = engine_string(&e.to_string()) };
            return e.engine_code();
        }
    };

    // Declare the schema before committing to the table object, so a bad
    // declaration leaves no registry entry behind.
    let declaration = match CString::new(table.declaration()) {
        Ok(d) => d,
        Err(_) => {
            unsafe { *pz_err = engine_string("table declaration contains a NUL byte") };
            return ffi::SQLITE_ERROR;
        }
    };
    let rc = unsafe { ffi::sqlite3_declare_vtab(db, declaration.as_ptr()) };
    if rc != ffi::SQLITE_OK {
        let message = unsafe { errmsg(db) };
        unsafe { *pz_err = engine_string(&message) };
        return rc;
    }

    let token = TABLES.lock().unwrap().create(table);
    let record = unsafe { allocate::<VTabRecord>() };
    if record.is_null() {
        TABLES.lock().unwrap().dispose(token);
        return ffi::SQLITE_NOMEM;
    }
    unsafe {
        (*record).token = token;
        *pp_vtab = record.cast();
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_connect(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    unsafe { connect_or_create(db, aux, argc, argv, pp_vtab, pz_err, false) }
}

unsafe extern "C" fn vtab_create(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    unsafe { connect_or_create(db, aux, argc, argv, pp_vtab, pz_err, true) }
}

unsafe extern "C" fn vtab_best_index(
    p_vtab: *mut ffi::sqlite3_vtab,
    p_info: *mut ffi::sqlite3_index_info,
) -> c_int {
    let table = unsafe { &*table_ptr(p_vtab) };
    let mut info = IndexInfo::new(p_info);
    match table.best_index(&mut info) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => unsafe { set_vtab_error(p_vtab, &e) },
    }
}

unsafe extern "C" fn vtab_disconnect(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    let token = unsafe { (*p_vtab.cast::<VTabRecord>()).token };
    unsafe { release(p_vtab.cast::<VTabRecord>()) };
    let mut table = TABLES.lock().unwrap().dispose(token);
    table.disconnect();
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_destroy(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    let token = unsafe { (*p_vtab.cast::<VTabRecord>()).token };
    // On a non-OK status the engine keeps its pointer to the record and
    // disconnects the table later, so the record and handle must stay
    // alive until destroy() has succeeded.
    let table = unsafe { &mut *TABLES.lock().unwrap().resolve(token) };
    if let Err(e) = table.destroy() {
        return unsafe { set_vtab_error(p_vtab, &e) };
    }
    unsafe { release(p_vtab.cast::<VTabRecord>()) };
    TABLES.lock().unwrap().dispose(token);
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_open(
    p_vtab: *mut ffi::sqlite3_vtab,
    pp_cursor: *mut *mut ffi::sqlite3_vtab_cursor,
) -> c_int {
    let table = unsafe { &mut *table_ptr(p_vtab) };
    let cursor = match table.open() {
        Ok(cursor) => cursor,
        Err(e) => return unsafe { set_vtab_error(p_vtab, &e) },
    };
    let token = CURSORS.lock().unwrap().create(cursor);
    let record = unsafe { allocate::<CursorRecord>() };
    if record.is_null() {
        CURSORS.lock().unwrap().dispose(token);
        return ffi::SQLITE_NOMEM;
    }
    unsafe {
        (*record).token = token;
        *pp_cursor = record.cast();
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn cursor_close(p_cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let token = unsafe { (*p_cursor.cast::<CursorRecord>()).token };
    unsafe { release(p_cursor.cast::<CursorRecord>()) };
    let mut cursor = CURSORS.lock().unwrap().dispose(token);
    cursor.close();
    ffi::SQLITE_OK
}

/// Report a cursor callback error through the owning table's error slot.
unsafe fn cursor_error(p_cursor: *mut ffi::sqlite3_vtab_cursor, e: &Error) -> c_int {
    unsafe { set_vtab_error((*p_cursor).pVtab, e) }
}

unsafe extern "C" fn cursor_filter(
    p_cursor: *mut ffi::sqlite3_vtab_cursor,
    idx_num: c_int,
    idx_str: *const c_char,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) -> c_int {
    let cursor = unsafe { &mut *cursor_ptr(p_cursor) };
    let plan;
    let idx_str = if idx_str.is_null() {
        None
    } else {
        plan = unsafe { CStr::from_ptr(idx_str) }.to_string_lossy();
        Some(plan.as_ref())
    };
    let args = unsafe { Values::from_raw(argv, argc) };
    match cursor.filter(idx_num, idx_str, &args) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => unsafe { cursor_error(p_cursor, &e) },
    }
}

unsafe extern "C" fn cursor_next(p_cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let cursor = unsafe { &mut *cursor_ptr(p_cursor) };
    match cursor.next() {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => unsafe { cursor_error(p_cursor, &e) },
    }
}

unsafe extern "C" fn cursor_eof(p_cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let cursor = unsafe { &*cursor_ptr(p_cursor) };
    cursor.eof() as c_int
}

unsafe extern "C" fn cursor_column(
    p_cursor: *mut ffi::sqlite3_vtab_cursor,
    p_ctx: *mut ffi::sqlite3_context,
    column: c_int,
) -> c_int {
    let cursor = unsafe { &*cursor_ptr(p_cursor) };
    let mut ctx = Context::new(p_ctx);
    match cursor.column(&mut ctx, column) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => {
            unsafe { result_error(p_ctx, &e) };
            e.engine_code()
        }
    }
}

unsafe extern "C" fn cursor_rowid(
    p_cursor: *mut ffi::sqlite3_vtab_cursor,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    let cursor = unsafe { &*cursor_ptr(p_cursor) };
    unsafe { *p_rowid = cursor.rowid() };
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_update(
    p_vtab: *mut ffi::sqlite3_vtab,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    let table = unsafe { &mut *table_ptr(p_vtab) };
    let args = unsafe { Values::from_raw(argv, argc) };
    match table.update(&args) {
        Ok(rowid) => {
            if !p_rowid.is_null() {
                unsafe { *p_rowid = rowid };
            }
            ffi::SQLITE_OK
        }
        Err(Error::ReadOnly) => ffi::SQLITE_READONLY,
        Err(e) => unsafe { set_vtab_error(p_vtab, &e) },
    }
}

unsafe extern "C" fn vtab_rename(p_vtab: *mut ffi::sqlite3_vtab, z_new: *const c_char) -> c_int {
    let table = unsafe { &mut *table_ptr(p_vtab) };
    let new_name = unsafe { CStr::from_ptr(z_new) }.to_string_lossy();
    if table.rename(&new_name) {
        ffi::SQLITE_OK
    } else {
        unsafe {
            set_vtab_error(
                p_vtab,
                &Error::Message("rename is not supported by this virtual table".into()),
            )
        }
    }
}

unsafe fn transaction_call(
    p_vtab: *mut ffi::sqlite3_vtab,
    f: impl FnOnce(&mut dyn VirtualTable) -> Result<()>,
) -> c_int {
    let table = unsafe { &mut *table_ptr(p_vtab) };
    match f(table) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => unsafe { set_vtab_error(p_vtab, &e) },
    }
}

unsafe extern "C" fn vtab_begin(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    unsafe { transaction_call(p_vtab, |t| t.begin()) }
}

unsafe extern "C" fn vtab_sync(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    unsafe { transaction_call(p_vtab, |t| t.sync()) }
}

unsafe extern "C" fn vtab_commit(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    unsafe { transaction_call(p_vtab, |t| t.commit()) }
}

unsafe extern "C" fn vtab_rollback(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    unsafe { transaction_call(p_vtab, |t| t.rollback()) }
}

unsafe extern "C" fn vtab_savepoint(p_vtab: *mut ffi::sqlite3_vtab, n: c_int) -> c_int {
    unsafe { transaction_call(p_vtab, |t| t.savepoint(n)) }
}

unsafe extern "C" fn vtab_release(p_vtab: *mut ffi::sqlite3_vtab, n: c_int) -> c_int {
    unsafe { transaction_call(p_vtab, |t| t.release(n)) }
}

unsafe extern "C" fn vtab_rollback_to(p_vtab: *mut ffi::sqlite3_vtab, n: c_int) -> c_int {
    unsafe { transaction_call(p_vtab, |t| t.rollback_to(n)) }
}
