//!
//! Query plan negotiation for `best_index`.
//!
//! `IndexInfo` wraps the engine's `sqlite3_index_info` record for the
//! duration of one `best_index` call. Inputs (constraints, orderings,
//! used columns) are read out as plain values; outputs are written back
//! through setters. The index string is copied into engine memory and
//! flagged for the engine to free, so the planner may cache or replay the
//! plan independently of the callback frame.
//!

use std::ffi::c_int;

use rusqlite::ffi;

use crate::error::engine_string;

/// Constraint operators the planner can hand to `best_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Le,
    Lt,
    Ge,
    Match,
    Like,
    Glob,
    Regexp,
    Ne,
    IsNot,
    IsNotNull,
    IsNull,
    Is,
    Limit,
    Offset,
    /// Operator registered through an overloaded function; carries the
    /// raw engine code.
    Function(u8),
}

impl ConstraintOp {
    fn from_code(code: u8) -> ConstraintOp {
        match code {
            2 => ConstraintOp::Eq,
            4 => ConstraintOp::Gt,
            8 => ConstraintOp::Le,
            16 => ConstraintOp::Lt,
            32 => ConstraintOp::Ge,
            64 => ConstraintOp::Match,
            65 => ConstraintOp::Like,
            66 => ConstraintOp::Glob,
            67 => ConstraintOp::Regexp,
            68 => ConstraintOp::Ne,
            69 => ConstraintOp::IsNot,
            70 => ConstraintOp::IsNotNull,
            71 => ConstraintOp::IsNull,
            72 => ConstraintOp::Is,
            73 => ConstraintOp::Limit,
            74 => ConstraintOp::Offset,
            other => ConstraintOp::Function(other),
        }
    }
}

/// One WHERE-clause term offered to the table.
#[derive(Debug, Clone, Copy)]
pub struct IndexConstraint {
    /// Column index; -1 is the rowid.
    pub column: i32,
    pub op: ConstraintOp,
    /// Only usable constraints may be assigned an argument slot.
    pub usable: bool,
}

/// One ORDER BY term.
#[derive(Debug, Clone, Copy)]
pub struct OrderBy {
    pub column: i32,
    pub desc: bool,
}

/// Plan flag: the chosen index visits at most one row.
pub const INDEX_SCAN_UNIQUE: i32 = ffi::SQLITE_INDEX_SCAN_UNIQUE;

pub struct IndexInfo {
    ptr: *mut ffi::sqlite3_index_info,
}

impl IndexInfo {
    pub(crate) fn new(ptr: *mut ffi::sqlite3_index_info) -> IndexInfo {
        IndexInfo { ptr }
    }

    pub fn constraint_count(&self) -> usize {
        unsafe { (*self.ptr).nConstraint as usize }
    }

    pub fn constraint(&self, index: usize) -> IndexConstraint {
        assert!(
            index < self.constraint_count(),
            "constraint index {index} out of bounds"
        );
        let raw = unsafe { &*(*self.ptr).aConstraint.add(index) };
        IndexConstraint {
            column: raw.iColumn,
            op: ConstraintOp::from_code(raw.op),
            usable: raw.usable != 0,
        }
    }

    pub fn constraints(&self) -> impl Iterator<Item = IndexConstraint> + '_ {
        (0..self.constraint_count()).map(|i| self.constraint(i))
    }

    pub fn order_by_count(&self) -> usize {
        unsafe { (*self.ptr).nOrderBy as usize }
    }

    pub fn order_bys(&self) -> impl Iterator<Item = OrderBy> + '_ {
        (0..self.order_by_count()).map(|i| {
            let raw = unsafe { &*(*self.ptr).aOrderBy.add(i) };
            OrderBy {
                column: raw.iColumn,
                desc: raw.desc != 0,
            }
        })
    }

    /// Bitmask of columns the statement actually reads; bit 63 covers
    /// columns 63 and above.
    pub fn columns_used(&self) -> u64 {
        unsafe { (*self.ptr).colUsed }
    }

    /// Route the value of constraint `index` into `filter` argument slot
    /// `argv_index` (1-based; slots must be used consecutively).
    pub fn set_argv_index(&mut self, index: usize, argv_index: i32) {
        assert!(
            index < self.constraint_count(),
            "constraint index {index} out of bounds"
        );
        unsafe { (*(*self.ptr).aConstraintUsage.add(index)).argvIndex = argv_index };
    }

    /// Tell the engine not to re-check constraint `index` on rows the
    /// cursor produces.
    pub fn set_omit(&mut self, index: usize, omit: bool) {
        assert!(
            index < self.constraint_count(),
            "constraint index {index} out of bounds"
        );
        unsafe { (*(*self.ptr).aConstraintUsage.add(index)).omit = omit as u8 };
    }

    pub fn set_index_number(&mut self, idx_num: i32) {
        unsafe { (*self.ptr).idxNum = idx_num };
    }

    /// Attach a plan string that `filter` will receive. The string is
    /// copied into engine memory; a string set by an earlier call on the
    /// same negotiation is released first.
    pub fn set_index_string(&mut self, idx_str: Option<&str>) {
        unsafe {
            if (*self.ptr).needToFreeIdxStr != 0 && !(*self.ptr).idxStr.is_null() {
                ffi::sqlite3_free((*self.ptr).idxStr.cast());
            }
            match idx_str {
                Some(s) => {
                    (*self.ptr).idxStr = engine_string(s);
                    (*self.ptr).needToFreeIdxStr = 1;
                }
                None => {
                    (*self.ptr).idxStr = std::ptr::null_mut();
                    (*self.ptr).needToFreeIdxStr = 0;
                }
            }
        }
    }

    /// Promise that the cursor will produce rows in the requested order.
    pub fn set_order_by_consumed(&mut self, consumed: bool) {
        unsafe { (*self.ptr).orderByConsumed = consumed as c_int };
    }

    pub fn set_estimated_cost(&mut self, cost: f64) {
        unsafe { (*self.ptr).estimatedCost = cost };
    }

    pub fn set_estimated_rows(&mut self, rows: i64) {
        unsafe { (*self.ptr).estimatedRows = rows };
    }

    /// Plan flags, e.g. [`INDEX_SCAN_UNIQUE`].
    pub fn set_index_flags(&mut self, flags: i32) {
        unsafe { (*self.ptr).idxFlags = flags };
    }
}
