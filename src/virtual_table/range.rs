//! `generate_series(start, stop, step)`: an eponymous-only table of integers.
//!
//! ```sql
//! SELECT value FROM generate_series(5, 50, 5);
//! SELECT value FROM generate_series WHERE start = 1 AND stop = 3 ORDER BY value DESC;
//! ```
//!
//! Omitted bounds default to `start = 0`, `stop = 4294967295`, `step = 1`.
use std::borrow::Cow;
use std::ffi::CStr;
use std::os::raw::c_int;
use std::rc::Rc;

use crate::dynamics::{RowValue, Value};
use crate::error::{Error, Result};
use crate::sqlite3_raw::sqlite3;
use crate::virtual_table::index::{ConstraintOp, IndexInfo, Plan};
use crate::virtual_table::{create_module, IndexPlanner, ModuleArguments, ModuleConfig, VirtualCursor, VirtualTable};

const SERIES_COLUMN_VALUE: c_int = 0;
const SERIES_COLUMN_START: c_int = 1;
const SERIES_COLUMN_STOP: c_int = 2;
const SERIES_COLUMN_STEP: c_int = 3;
const SERIES_COLUMNS: c_int = 4;

// plan id bits
const PLAN_START: c_int = 1;
const PLAN_STOP: c_int = 2;
const PLAN_STEP: c_int = 4;
const PLAN_DESC: c_int = 8;

const DEFAULT_STOP: i64 = 0xffff_ffff;

#[derive(Debug, Default)]
pub struct RangeTable;

/// Register `generate_series` on `db`.
///
/// # Safety
/// `db` must be a valid, open connection.
pub unsafe fn register(db: *mut sqlite3) -> Result<()> {
    create_module(db, "generate_series", crate::dispatch_table!(RangeTable), ())?;
    Ok(())
}

impl VirtualTable for RangeTable {
    type Aux = ();
    type Cursor = RangeCursor;

    fn connect(_aux: &Rc<()>, _args: &ModuleArguments) -> Result<RangeTable> {
        Ok(RangeTable)
    }

    fn declaration(&self) -> Cow<'static, CStr> {
        Cow::Borrowed(const_cstr!("CREATE TABLE x(value, start HIDDEN, stop HIDDEN, step HIDDEN)").as_cstr())
    }

    fn config(&self, config: &mut ModuleConfig) -> Result<()> {
        config.set_innocuous()
    }

    fn open(&self) -> Result<RangeCursor> {
        Ok(RangeCursor::default())
    }
}

impl IndexPlanner for RangeTable {
    /// The plan id is a bitmask of which of start=, stop= and step= are
    /// available (in that argv order), plus a bit for descending output.
    fn best_index(&self, info: &mut IndexInfo<'_>) -> Result<()> {
        let mut plan = 0;
        let mut slots: [Option<usize>; 3] = [None; 3];
        for (i, constraint) in info.constraints().enumerate() {
            if !constraint.usable || constraint.op != ConstraintOp::Eq {
                continue;
            }
            let (slot, bit) = match constraint.column {
                SERIES_COLUMN_START => (0, PLAN_START),
                SERIES_COLUMN_STOP => (1, PLAN_STOP),
                SERIES_COLUMN_STEP => (2, PLAN_STEP),
                _ => continue,
            };
            slots[slot] = Some(i);
            plan |= bit;
        }

        let mut n_arg = 0;
        for index in slots.iter().flatten() {
            n_arg += 1;
            // no longer checked by SQLite
            info.set_usage(*index, n_arg, true)?;
        }

        if plan & (PLAN_START | PLAN_STOP) == PLAN_START | PLAN_STOP {
            // both boundaries known: the preferred case
            info.set_estimated_cost(if plan & PLAN_STEP != 0 { 1.0 } else { 2.0 });
            info.set_estimated_rows(1000);
            let order: Vec<_> = info.order_bys().collect();
            if let [term] = order.as_slice() {
                if term.column == SERIES_COLUMN_VALUE {
                    if term.desc {
                        plan |= PLAN_DESC;
                    }
                    info.set_order_by_consumed(true);
                }
            }
        } else {
            // a missing boundary means a huge span of numbers
            info.set_estimated_cost(2_147_483_647.0);
            info.set_estimated_rows(2_147_483_647);
        }
        info.set_plan_id(plan);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RangeCursor {
    rowid: i64,
    value: i64,
    start: i64,
    stop: i64,
    step: i64,
    descending: bool,
    done: bool,
}

impl RangeCursor {
    fn advance(&mut self) {
        let next = if self.descending {
            self.value.checked_sub(self.step)
        } else {
            self.value.checked_add(self.step)
        };
        match next {
            Some(value) => self.value = value,
            None => self.done = true,
        }
    }
}

impl VirtualCursor for RangeCursor {
    type Table = RangeTable;

    fn filter(&mut self, _table: &RangeTable, plan: &Plan<'_>, values: &[Value<'_>]) -> Result<()> {
        let mut args = values.iter().map(|v| v.as_i64());
        let mut take = |bit: c_int, default: i64| -> Result<i64> {
            if plan.id & bit == 0 {
                return Ok(default);
            }
            args.next()
                .ok_or_else(|| Error::misuse("generate_series plan expects more arguments"))
        };
        self.start = take(PLAN_START, 0)?;
        self.stop = take(PLAN_STOP, DEFAULT_STOP)?;
        self.step = take(PLAN_STEP, 1)?.max(1);
        self.descending = plan.id & PLAN_DESC != 0;
        self.rowid = 1;
        self.done = self.start > self.stop;
        if self.descending && !self.done {
            // last value of the ascending series
            let span = (self.stop as i128) - (self.start as i128);
            self.value = (self.stop as i128 - span % self.step as i128) as i64;
        } else {
            self.value = self.start;
        }
        Ok(())
    }

    fn next(&mut self, _table: &RangeTable) -> Result<()> {
        self.advance();
        self.rowid += 1;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.done || if self.descending { self.value < self.start } else { self.value > self.stop }
    }

    fn column(&self, _table: &RangeTable, index: c_int, _no_change: bool) -> Result<RowValue> {
        let x = match index {
            SERIES_COLUMN_VALUE => self.value,
            SERIES_COLUMN_START => self.start,
            SERIES_COLUMN_STOP => self.stop,
            SERIES_COLUMN_STEP => self.step,
            _ => return Err(Error::range(index, SERIES_COLUMNS)),
        };
        Ok(x.into())
    }

    fn row_id(&self, _table: &RangeTable) -> Result<i64> {
        Ok(self.rowid)
    }
}
