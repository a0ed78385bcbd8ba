//! Per-table function overloading.
//!
//! When a SQL function is applied to a column of a virtual table, SQLite asks
//! the table (through `find_function`) whether it wants to supply its own
//! implementation. The table answers with a [`ScalarOverload`] it owns.
use std::fmt;
use std::os::raw::{c_int, c_void};

use tracing::warn;

use crate::dynamics::{result_error, RowValue, Value};
use crate::error::{catch, Error, Result};
use crate::sqlite3_raw::*;

/// Signature SQLite expects for a scalar function body.
pub type ScalarFunction = unsafe extern "C" fn(*mut sqlite3_context, c_int, *mut *mut sqlite3_value);

/// First operator code available to indexable overloads.
pub const FIRST_FUNCTION_OP: u8 = 150;

type Body = dyn Fn(&[Value<'_>]) -> Result<RowValue>;

/// A Rust closure standing in for a SQL function on one table.
///
/// SQLite keeps a pointer to the overload for as long as the statement that
/// resolved it runs, so it must live inside the table and stay put. Storing
/// it in a field that is never replaced while statements are open is enough.
pub struct ScalarOverload {
    body: Box<Body>,
    op: Option<u8>,
}

impl ScalarOverload {
    pub fn new<F>(body: F) -> ScalarOverload
    where
        F: Fn(&[Value<'_>]) -> Result<RowValue> + 'static,
    {
        ScalarOverload { body: Box::new(body), op: None }
    }

    /// An overload that may also appear as a constraint in `best_index`,
    /// reported with operator code `op`.
    pub fn indexable<F>(body: F, op: u8) -> Result<ScalarOverload>
    where
        F: Fn(&[Value<'_>]) -> Result<RowValue> + 'static,
    {
        if op < FIRST_FUNCTION_OP {
            return Err(Error::misuse(format!(
                "overload operator {} is below {}",
                op, FIRST_FUNCTION_OP
            )));
        }
        Ok(ScalarOverload { body: Box::new(body), op: Some(op) })
    }

    pub fn constraint_op(&self) -> Option<u8> {
        self.op
    }

    pub fn call(&self, args: &[Value<'_>]) -> Result<RowValue> {
        (self.body)(args)
    }

    /// The value `xFindFunction` returns for this overload.
    pub(crate) fn find_result(&self) -> c_int {
        self.op.map_or(1, c_int::from)
    }

    pub(crate) fn user_data(&self) -> *mut c_void {
        self as *const ScalarOverload as *mut c_void
    }
}

impl fmt::Debug for ScalarOverload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarOverload").field("op", &self.op).finish()
    }
}

/// Body of every overload: recover the closure from the user data and run it.
pub(crate) unsafe extern "C" fn call_overload(
    ctx: *mut sqlite3_context,
    argc: c_int,
    argv: *mut *mut sqlite3_value,
) {
    let overload = &*(sqlite3_user_data(ctx) as *const ScalarOverload);
    let args = Value::slice_from_raw(argv, argc);
    if let Err(err) = catch(|| overload.call(args)?.push_to(ctx)) {
        warn!(error = %err, "overloaded function failed");
        result_error(ctx, &err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexable_overloads_need_function_operators() {
        let low = ScalarOverload::indexable(|_| Ok(RowValue::Null), 74);
        assert!(matches!(low, Err(Error::Misuse(_))));

        let ok = ScalarOverload::indexable(|_| Ok(RowValue::Null), 151).unwrap();
        assert_eq!(ok.constraint_op(), Some(151));
        assert_eq!(ok.find_result(), 151);
    }

    #[test]
    fn plain_overloads_report_one() {
        let plain = ScalarOverload::new(|_| Ok(RowValue::Integer(7)));
        assert_eq!(plain.find_result(), 1);
        assert_eq!(plain.call(&[]).unwrap(), RowValue::Integer(7));
    }
}
