//!
//! Application-defined SQL functions.
//!
//! Scalars are a single trait object resolved from the registration
//! token in the function's user-data slot. Aggregates split into a
//! factory (the registered object) and per-group accumulators: the
//! engine's 8-byte aggregate context holds the accumulator's registry
//! token, minted lazily on the first `step` of each group and retired in
//! the final callback. Token 0 means "no accumulator yet", which is what
//! a freshly zero-initialized slot reads as.
//!

use std::ffi::{c_int, c_void, CString};
use std::sync::{LazyLock, Mutex};

use rusqlite::ffi;

use crate::context::Context;
use crate::error::{check, result_error, Result};
use crate::handle::HandleTable;
use crate::value::Values;

/// A scalar SQL function. Implemented for free by compatible closures.
pub trait ScalarFunction: 'static {
    fn invoke(&self, args: &Values<'_>, ctx: &mut Context) -> Result<()>;
}

impl<F> ScalarFunction for F
where
    F: Fn(&Values<'_>, &mut Context) -> Result<()> + 'static,
{
    fn invoke(&self, args: &Values<'_>, ctx: &mut Context) -> Result<()> {
        self(args, ctx)
    }
}

/// Factory for per-group aggregate state.
pub trait AggregateFunction: 'static {
    fn create_accumulator(&self) -> Box<dyn Accumulator>;
}

/// Running state of one aggregate group.
pub trait Accumulator: 'static {
    fn step(&mut self, args: &Values<'_>) -> Result<()>;

    /// Produce the group's result. For a group that matched no rows this
    /// runs on a fresh accumulator that never saw a `step`.
    fn finish(&mut self, ctx: &mut Context) -> Result<()>;
}

static SCALARS: LazyLock<Mutex<HandleTable<dyn ScalarFunction>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));
static AGGREGATES: LazyLock<Mutex<HandleTable<dyn AggregateFunction>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));
static ACCUMULATORS: LazyLock<Mutex<HandleTable<dyn Accumulator>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));

pub(crate) fn register_scalar(
    db: *mut ffi::sqlite3,
    name: &str,
    n_arg: i32,
    function: Box<dyn ScalarFunction>,
) -> Result<()> {
    let c_name = CString::new(name)?;
    let token = SCALARS.lock().unwrap().create(function);
    tracing::debug!(name, arity = n_arg, "registering scalar function");
    // On failure the engine invokes the destructor, which disposes the
    // token.
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            c_name.as_ptr(),
            n_arg as c_int,
            ffi::SQLITE_UTF8,
            token as *mut c_void,
            Some(scalar_invoke),
            None,
            None,
            Some(scalar_destroy),
        )
    };
    unsafe { check(db, rc) }
}

pub(crate) fn register_aggregate(
    db: *mut ffi::sqlite3,
    name: &str,
    n_arg: i32,
    function: Box<dyn AggregateFunction>,
) -> Result<()> {
    let c_name = CString::new(name)?;
    let token = AGGREGATES.lock().unwrap().create(function);
    tracing::debug!(name, arity = n_arg, "registering aggregate function");
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            c_name.as_ptr(),
            n_arg as c_int,
            ffi::SQLITE_UTF8,
            token as *mut c_void,
            None,
            Some(aggregate_step),
            Some(aggregate_final),
            Some(aggregate_destroy),
        )
    };
    unsafe { check(db, rc) }
}

unsafe extern "C" fn scalar_invoke(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let token = unsafe { ffi::sqlite3_user_data(ctx) } as usize;
    let function = unsafe { &*SCALARS.lock().unwrap().resolve(token) };
    let args = unsafe { Values::from_raw(argv, argc) };
    let mut context = Context::new(ctx);
    if let Err(e) = function.invoke(&args, &mut context) {
        unsafe { result_error(ctx, &e) };
    }
}

unsafe extern "C" fn scalar_destroy(user_data: *mut c_void) {
    SCALARS.lock().unwrap().dispose(user_data as usize);
}

/// The group's accumulator-token slot, or NULL when the engine is out of
/// memory (`size` > 0) or no slot was ever made (`size` == 0).
unsafe fn accumulator_slot(ctx: *mut ffi::sqlite3_context, size: c_int) -> *mut usize {
    unsafe { ffi::sqlite3_aggregate_context(ctx, size) }.cast::<usize>()
}

unsafe extern "C" fn aggregate_step(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let slot = unsafe { accumulator_slot(ctx, std::mem::size_of::<usize>() as c_int) };
    if slot.is_null() {
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    }
    if unsafe { *slot } == 0 {
        let factory_token = unsafe { ffi::sqlite3_user_data(ctx) } as usize;
        let factory = unsafe { &*AGGREGATES.lock().unwrap().resolve(factory_token) };
        let accumulator = factory.create_accumulator();
        unsafe { *slot = ACCUMULATORS.lock().unwrap().create(accumulator) };
    }
    let accumulator = unsafe { &mut *ACCUMULATORS.lock().unwrap().resolve(*slot) };
    let args = unsafe { Values::from_raw(argv, argc) };
    if let Err(e) = accumulator.step(&args) {
        unsafe { result_error(ctx, &e) };
    }
}

unsafe extern "C" fn aggregate_final(ctx: *mut ffi::sqlite3_context) {
    let mut context = Context::new(ctx);
    let slot = unsafe { accumulator_slot(ctx, 0) };
    let mut accumulator = if slot.is_null() || unsafe { *slot } == 0 {
        // No row ever reached step for this group.
        let factory_token = unsafe { ffi::sqlite3_user_data(ctx) } as usize;
        let factory = unsafe { &*AGGREGATES.lock().unwrap().resolve(factory_token) };
        factory.create_accumulator()
    } else {
        let token = unsafe { *slot };
        unsafe { *slot = 0 };
        ACCUMULATORS.lock().unwrap().dispose(token)
    };
    if let Err(e) = accumulator.finish(&mut context) {
        unsafe { result_error(ctx, &e) };
    }
}

unsafe extern "C" fn aggregate_destroy(user_data: *mut c_void) {
    AGGREGATES.lock().unwrap().dispose(user_data as usize);
}
