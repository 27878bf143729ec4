//! Safe bridge to SQLite's extension points.
//!
//! SQLite's virtual table and application-defined function interfaces
//! are C callback tables. This crate lets both be written as ordinary
//! trait implementations:
//!
//! - [`Module`], [`VirtualTable`] and [`VTabCursor`] for virtual tables,
//!   registered with [`Database::create_module`] (eponymous) or
//!   [`Database::create_persistent_module`];
//! - [`ScalarFunction`] (closures qualify) and [`AggregateFunction`] /
//!   [`Accumulator`] for SQL functions;
//! - [`Database::set_update_hook`] for row change notifications.
//!
//! The engine only ever sees pointer-sized registry tokens and
//! engine-allocated host records, never addresses of crate objects.
//! Errors returned by trait methods surface as statement errors with
//! their message intact; they do not unwind through the engine.

pub mod context;
pub mod database;
pub mod error;
pub mod function;
pub mod index_info;
pub mod value;
pub mod vtab;

mod handle;
mod record;

pub use context::Context;
pub use database::{with_database, with_memory_database, Database, UpdateAction};
pub use error::{Error, Result};
pub use function::{Accumulator, AggregateFunction, ScalarFunction};
pub use index_info::{ConstraintOp, IndexConstraint, IndexInfo, OrderBy, INDEX_SCAN_UNIQUE};
pub use value::{SqliteType, Value, Values};
pub use vtab::{Module, VTabConnection, VTabCursor, VirtualTable};
