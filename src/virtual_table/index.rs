//! The index selection protocol.
//!
//! While planning, SQLite hands `best_index` an [`IndexInfo`] describing the
//! WHERE and ORDER BY terms it could delegate. Whatever the planner writes
//! back (plan id, plan data, argv positions) comes back in `filter` as a
//! [`Plan`] plus the constraint values, in argv order.
//!
//! The default planner only looks at the table's key column. Each usable
//! `=`, `>`, `>=`, `<`, `<=` term on it is consumed, and its operator code is
//! appended to the plan data, so byte `i` of the plan data describes value
//! `i` handed to `filter`. [`Plan::key_range`] folds those back into a single
//! [`KeyRange`].
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::marker::PhantomData;
use std::ops::Bound;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;

use smallvec::SmallVec;
use tracing::trace;

use crate::dynamics::{RowValue, Value};
use crate::error::{Error, Result};
use crate::memory;
use crate::sqlite3_raw::*;

/// Bit of the plan id the default planner sets for a descending scan.
pub const PLAN_DESCENDING: c_int = 1;

/// Plan data byte for a `filter` value holding a whole `IN (...)` list.
pub const PLAN_IN_LIST: u8 = 1;

/// Constraint operators SQLite offers to a virtual table.
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
    /// Operator chosen by an overloaded function, always >= 150.
    Function(u8),
}

impl From<u8> for ConstraintOp {
    fn from(code: u8) -> ConstraintOp {
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
            v => ConstraintOp::Function(v),
        }
    }
}

impl From<ConstraintOp> for u8 {
    fn from(op: ConstraintOp) -> u8 {
        match op {
            ConstraintOp::Eq => 2,
            ConstraintOp::Gt => 4,
            ConstraintOp::Le => 8,
            ConstraintOp::Lt => 16,
            ConstraintOp::Ge => 32,
            ConstraintOp::Match => 64,
            ConstraintOp::Like => 65,
            ConstraintOp::Glob => 66,
            ConstraintOp::Regexp => 67,
            ConstraintOp::Ne => 68,
            ConstraintOp::IsNot => 69,
            ConstraintOp::IsNotNull => 70,
            ConstraintOp::IsNull => 71,
            ConstraintOp::Is => 72,
            ConstraintOp::Limit => 73,
            ConstraintOp::Offset => 74,
            ConstraintOp::Function(v) => v,
        }
    }
}

impl ConstraintOp {
    /// One of the five comparisons that narrow an ordered key.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            ConstraintOp::Eq | ConstraintOp::Gt | ConstraintOp::Ge | ConstraintOp::Lt | ConstraintOp::Le
        )
    }
}

/// One WHERE term, as offered by SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    /// Column constrained, -1 for the rowid.
    pub column: c_int,
    pub op: ConstraintOp,
    /// Unusable terms must not be consumed.
    pub usable: bool,
}

/// One ORDER BY term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: c_int,
    pub desc: bool,
}

bitflags::bitflags! {
    /// `SQLITE_INDEX_SCAN_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IndexScanFlags: c_int {
        /// The scan visits at most one row.
        const UNIQUE = SQLITE_INDEX_SCAN_UNIQUE;
    }
}

/// What `sqlite3_vtab_distinct` reports about the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctMode {
    Ordered,
    Grouped,
    Distinct,
    DistinctOrdered,
}

/// Planning view over `sqlite3_index_info`.
pub struct IndexInfo<'a> {
    raw: *mut sqlite3_index_info,
    _borrow: PhantomData<&'a mut sqlite3_index_info>,
}

impl<'a> IndexInfo<'a> {
    /// # Safety
    /// `raw` must be the index info SQLite passed to `xBestIndex`, valid for `'a`.
    pub unsafe fn from_raw(raw: *mut sqlite3_index_info) -> IndexInfo<'a> {
        IndexInfo { raw, _borrow: PhantomData }
    }

    pub fn as_ptr(&self) -> *mut sqlite3_index_info {
        self.raw
    }

    fn raw_constraints(&self) -> &[sqlite3_index_constraint] {
        unsafe {
            let info = &*self.raw;
            if info.aConstraint.is_null() || info.nConstraint <= 0 {
                &[]
            } else {
                slice::from_raw_parts(info.aConstraint, info.nConstraint as usize)
            }
        }
    }

    pub fn constraint_count(&self) -> usize {
        self.raw_constraints().len()
    }

    pub fn constraints(&self) -> impl Iterator<Item = Constraint> + '_ {
        self.raw_constraints().iter().map(|c| Constraint {
            column: c.iColumn,
            op: ConstraintOp::from(c.op),
            usable: c.usable != 0,
        })
    }

    pub fn constraint(&self, index: usize) -> Result<Constraint> {
        self.constraints()
            .nth(index)
            .ok_or_else(|| Error::range(index as c_int, self.constraint_count() as c_int))
    }

    pub fn order_bys(&self) -> impl Iterator<Item = OrderBy> + '_ {
        let raw = unsafe {
            let info = &*self.raw;
            if info.aOrderBy.is_null() || info.nOrderBy <= 0 {
                &[][..]
            } else {
                slice::from_raw_parts(info.aOrderBy, info.nOrderBy as usize)
            }
        };
        raw.iter().map(|o| OrderBy { column: o.iColumn, desc: o.desc != 0 })
    }

    /// Have SQLite pass constraint `index` as `filter` argument `argv_index`
    /// (1-based), and skip re-checking it when `omit` is set.
    pub fn set_usage(&mut self, index: usize, argv_index: c_int, omit: bool) -> Result<()> {
        let count = self.constraint_count();
        if index >= count {
            return Err(Error::range(index as c_int, count as c_int));
        }
        unsafe {
            let usage = &mut *(*self.raw).aConstraintUsage.add(index);
            usage.argvIndex = argv_index;
            usage.omit = omit as u8;
        }
        Ok(())
    }

    pub fn set_plan_id(&mut self, id: c_int) {
        unsafe { (*self.raw).idxNum = id };
    }

    /// Attach opaque plan data; SQLite frees it once the plan is discarded.
    pub fn set_plan_data(&mut self, data: &[u8]) -> Result<()> {
        let copy = memory::alloc_bytes_cstr(data)?;
        unsafe {
            let info = &mut *self.raw;
            if info.needToFreeIdxStr != 0 {
                memory::free(info.idxStr as *mut _);
            }
            info.idxStr = copy.as_ptr();
            info.needToFreeIdxStr = 1;
        }
        Ok(())
    }

    /// Ask for constraint `index`, when it is an `IN (...)` term, to reach
    /// `filter` as a single value holding the whole list (read it with
    /// [`Value::in_values`]) rather than one `filter` call per element.
    /// Only takes effect if the constraint is also given an argv index.
    ///
    /// Returns whether the constraint is such a term; always false before
    /// SQLite 3.38.
    pub fn set_in_handling(&mut self, index: usize, whole_list: bool) -> Result<bool> {
        let count = self.constraint_count();
        if index >= count {
            return Err(Error::range(index as c_int, count as c_int));
        }
        if library_version() < VTAB_IN_MIN_VERSION {
            return Ok(false);
        }
        Ok(unsafe { sqlite3_vtab_in(self.raw, index as c_int, whole_list as c_int) } != 0)
    }

    pub fn set_order_by_consumed(&mut self, consumed: bool) {
        unsafe { (*self.raw).orderByConsumed = consumed as c_int };
    }

    pub fn set_estimated_cost(&mut self, cost: f64) {
        unsafe { (*self.raw).estimatedCost = cost };
    }

    pub fn set_estimated_rows(&mut self, rows: i64) {
        unsafe { (*self.raw).estimatedRows = rows };
    }

    pub fn set_scan_flags(&mut self, flags: IndexScanFlags) {
        unsafe { (*self.raw).idxFlags = flags.bits() };
    }

    /// Bit `i` set when column `i` is read; bit 63 covers the rest.
    pub fn columns_used(&self) -> u64 {
        unsafe { (*self.raw).colUsed }
    }

    /// Collating sequence of the comparison in constraint `index`.
    pub fn collation(&self, index: usize) -> Result<&str> {
        let count = self.constraint_count();
        if index >= count {
            return Err(Error::range(index as c_int, count as c_int));
        }
        let name = unsafe { sqlite3_vtab_collation(self.raw, index as c_int) };
        if name.is_null() {
            return Ok("BINARY");
        }
        Ok(unsafe { CStr::from_ptr(name) }.to_str()?)
    }

    pub fn distinct(&self) -> DistinctMode {
        if library_version() < VTAB_IN_MIN_VERSION {
            return DistinctMode::Ordered;
        }
        match unsafe { sqlite3_vtab_distinct(self.raw) } {
            1 => DistinctMode::Grouped,
            2 => DistinctMode::Distinct,
            3 => DistinctMode::DistinctOrdered,
            _ => DistinctMode::Ordered,
        }
    }

    /// The right-hand side of constraint `index`, when it is known while
    /// planning (a literal rather than a column or parameter).
    pub fn rhs_value(&self, index: usize) -> Result<Option<Value<'_>>> {
        if library_version() < VTAB_IN_MIN_VERSION {
            return Ok(None);
        }
        let mut value: *mut sqlite3_value = ptr::null_mut();
        let rc = unsafe { sqlite3_vtab_rhs_value(self.raw, index as c_int, &mut value) };
        if rc == SQLITE_NOTFOUND || value.is_null() {
            return Ok(None);
        }
        check!(rc)?;
        Ok(Some(unsafe { Value::from_raw(value) }))
    }
}

/// Plan used by tables that do not plan for themselves.
///
/// With `key_column == None` nothing is consumed and SQLite scans everything.
pub fn default_best_index(info: &mut IndexInfo<'_>, key_column: Option<c_int>) -> Result<()> {
    let key = match key_column {
        Some(key) => key,
        None => return Ok(()),
    };

    let candidates: SmallVec<[(usize, ConstraintOp); 8]> = info
        .constraints()
        .enumerate()
        .filter(|(_, c)| c.usable && c.column == key && c.op.is_comparison())
        .map(|(i, c)| (i, c.op))
        .collect();

    let mut ops: SmallVec<[u8; 8]> = SmallVec::new();
    let (mut has_eq, mut has_list) = (false, false);
    let (mut has_lower, mut has_upper) = (false, false);
    for (index, op) in candidates {
        // text keys may be constrained with NOCASE or similar; the key order
        // only matches BINARY comparisons
        if info.collation(index)? != "BINARY" {
            continue;
        }
        let whole_list = op == ConstraintOp::Eq && info.set_in_handling(index, true)?;
        ops.push(if whole_list { PLAN_IN_LIST } else { op.into() });
        info.set_usage(index, ops.len() as c_int, true)?;
        match op {
            ConstraintOp::Eq if whole_list => has_list = true,
            ConstraintOp::Eq => has_eq = true,
            ConstraintOp::Gt | ConstraintOp::Ge => has_lower = true,
            _ => has_upper = true,
        }
    }

    let mut id = 0;
    let order: SmallVec<[OrderBy; 2]> = info.order_bys().collect();
    if let [term] = order.as_slice() {
        if term.column == key {
            if term.desc {
                id |= PLAN_DESCENDING;
            }
            info.set_order_by_consumed(true);
        }
    }
    info.set_plan_id(id);

    if !ops.is_empty() {
        info.set_plan_data(&ops)?;
    }
    if has_eq {
        info.set_estimated_cost(1.0);
        info.set_estimated_rows(1);
        info.set_scan_flags(IndexScanFlags::UNIQUE);
    } else if has_list {
        info.set_estimated_cost(10.0);
        info.set_estimated_rows(10);
    } else if has_lower && has_upper {
        info.set_estimated_cost(100.0);
        info.set_estimated_rows(100);
    } else if has_lower || has_upper {
        info.set_estimated_cost(1_000.0);
        info.set_estimated_rows(1_000);
    }
    trace!(plan_id = id, consumed = ops.len(), "default planner");
    Ok(())
}

/// A negotiated plan as seen by `filter`.
#[derive(Debug, Clone, Copy)]
pub struct Plan<'a> {
    pub id: c_int,
    pub data: Option<&'a CStr>,
}

impl<'a> Plan<'a> {
    /// # Safety
    /// `data` must be null or a NUL-terminated string valid for `'a`.
    pub unsafe fn from_raw(id: c_int, data: *const c_char) -> Plan<'a> {
        let data = if data.is_null() { None } else { Some(CStr::from_ptr(data)) };
        Plan { id, data }
    }

    pub fn data_bytes(&self) -> &'a [u8] {
        self.data.map_or(&[], CStr::to_bytes)
    }

    pub fn is_descending(&self) -> bool {
        self.id & PLAN_DESCENDING != 0
    }

    /// Operators recorded by the default planner, one per `filter` value.
    /// Whole `IN` lists read as [`ConstraintOp::Eq`].
    pub fn operators(&self) -> impl Iterator<Item = ConstraintOp> + 'a {
        self.data_bytes().iter().map(|&b| match b {
            PLAN_IN_LIST => ConstraintOp::Eq,
            other => ConstraintOp::from(other),
        })
    }

    /// Fold the values of a default plan into a single key range.
    pub fn key_range<K: IndexKey>(&self, values: &[Value<'_>]) -> Result<KeyRange<K>> {
        let ops = self.data_bytes();
        if ops.len() != values.len() {
            return Err(Error::misuse(format!(
                "plan describes {} values but filter received {}",
                ops.len(),
                values.len()
            )));
        }
        let mut range = KeyRange::full();
        for (&op, value) in ops.iter().zip(values) {
            if op != PLAN_IN_LIST {
                range.apply(ConstraintOp::from(op), &value.to_row_value()?);
            }
        }
        Ok(range)
    }

    /// Keys named by the whole `IN` lists of a default plan, sorted and
    /// without duplicates. Several lists intersect. `None` when the plan has
    /// no such list; the keys still have to be checked against
    /// [`Plan::key_range`].
    pub fn key_list<K: IndexKey>(&self, values: &[Value<'_>]) -> Result<Option<Vec<K>>> {
        let mut list: Option<BTreeSet<K>> = None;
        for (&op, value) in self.data_bytes().iter().zip(values) {
            if op != PLAN_IN_LIST {
                continue;
            }
            let mut keys = BTreeSet::new();
            for element in value.in_values()? {
                if let KeyConstraint::Bound(_, key) = K::key_constraint(ConstraintOp::Eq, &element?) {
                    keys.insert(key);
                }
            }
            list = Some(match list {
                None => keys,
                Some(previous) => previous.intersection(&keys).cloned().collect(),
            });
        }
        Ok(list.map(|keys| keys.into_iter().collect()))
    }
}

/// What a single constraint value means for a key of type `K`.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyConstraint<K> {
    Bound(ConstraintOp, K),
    /// Every key satisfies it.
    Always,
    /// No key satisfies it.
    Never,
}

/// Keys the default planner can turn constraint values into.
///
/// Implementations follow SQL's comparison rules: NULL matches nothing and
/// values of another storage class compare as NULL < numbers < text < blob.
pub trait IndexKey: Ord + Clone {
    fn key_constraint(op: ConstraintOp, value: &RowValue) -> KeyConstraint<Self>;
}

pub(crate) const I64_EDGE: f64 = 9_223_372_036_854_775_808.0;

fn float_lower_bound(op: ConstraintOp, f: f64) -> KeyConstraint<i64> {
    // smallest integer satisfying `x op f`
    let (op, edge) = if f.fract() == 0.0 { (op, f) } else { (ConstraintOp::Ge, f.ceil()) };
    if edge >= I64_EDGE {
        KeyConstraint::Never
    } else if edge < -I64_EDGE {
        KeyConstraint::Always
    } else {
        KeyConstraint::Bound(op, edge as i64)
    }
}

fn float_upper_bound(op: ConstraintOp, f: f64) -> KeyConstraint<i64> {
    let (op, edge) = if f.fract() == 0.0 { (op, f) } else { (ConstraintOp::Le, f.floor()) };
    if edge < -I64_EDGE {
        KeyConstraint::Never
    } else if edge >= I64_EDGE {
        KeyConstraint::Always
    } else {
        KeyConstraint::Bound(op, edge as i64)
    }
}

impl IndexKey for i64 {
    fn key_constraint(op: ConstraintOp, value: &RowValue) -> KeyConstraint<i64> {
        match value {
            RowValue::Integer(n) => KeyConstraint::Bound(op, *n),
            RowValue::Float(f) if f.is_nan() => KeyConstraint::Never,
            RowValue::Float(f) => match op {
                ConstraintOp::Eq if f.fract() != 0.0 || *f >= I64_EDGE || *f < -I64_EDGE => {
                    KeyConstraint::Never
                }
                ConstraintOp::Eq => KeyConstraint::Bound(op, *f as i64),
                ConstraintOp::Gt | ConstraintOp::Ge => float_lower_bound(op, *f),
                ConstraintOp::Lt | ConstraintOp::Le => float_upper_bound(op, *f),
                _ => KeyConstraint::Always,
            },
            // integers sort before text and blobs
            RowValue::Text(_) | RowValue::Blob(_) => match op {
                ConstraintOp::Lt | ConstraintOp::Le => KeyConstraint::Always,
                _ => KeyConstraint::Never,
            },
            RowValue::Null | RowValue::Pointer(_) | RowValue::NoChange => KeyConstraint::Never,
        }
    }
}

impl IndexKey for String {
    fn key_constraint(op: ConstraintOp, value: &RowValue) -> KeyConstraint<String> {
        match value {
            RowValue::Text(s) => KeyConstraint::Bound(op, s.clone()),
            // text sorts after numbers
            RowValue::Integer(_) | RowValue::Float(_) => match op {
                ConstraintOp::Gt | ConstraintOp::Ge => KeyConstraint::Always,
                _ => KeyConstraint::Never,
            },
            // and before blobs
            RowValue::Blob(_) => match op {
                ConstraintOp::Lt | ConstraintOp::Le => KeyConstraint::Always,
                _ => KeyConstraint::Never,
            },
            RowValue::Null | RowValue::Pointer(_) | RowValue::NoChange => KeyConstraint::Never,
        }
    }
}

/// An interval of keys narrowed by successive constraints.
///
/// The most restrictive bound always wins: the lower bound is the largest
/// candidate and the upper bound the smallest, with an excluded bound beating
/// an included one on the same key. Conflicting constraints leave a range
/// that [`is_empty`](KeyRange::is_empty) reports, and which must not be passed
/// to `BTreeMap::range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange<K> {
    lower: Bound<K>,
    upper: Bound<K>,
    never: bool,
}

impl<K: Ord + Clone> Default for KeyRange<K> {
    fn default() -> KeyRange<K> {
        KeyRange::full()
    }
}

impl<K: Ord + Clone> KeyRange<K> {
    pub fn full() -> KeyRange<K> {
        KeyRange { lower: Bound::Unbounded, upper: Bound::Unbounded, never: false }
    }

    pub fn empty() -> KeyRange<K> {
        KeyRange { lower: Bound::Unbounded, upper: Bound::Unbounded, never: true }
    }

    /// Narrow by `key op value`; operators other than the five comparisons
    /// are ignored.
    pub fn restrict(&mut self, op: ConstraintOp, key: K) {
        match op {
            ConstraintOp::Eq => {
                self.raise_lower(Bound::Included(key.clone()));
                self.lower_upper(Bound::Included(key));
            }
            ConstraintOp::Gt => self.raise_lower(Bound::Excluded(key)),
            ConstraintOp::Ge => self.raise_lower(Bound::Included(key)),
            ConstraintOp::Lt => self.lower_upper(Bound::Excluded(key)),
            ConstraintOp::Le => self.lower_upper(Bound::Included(key)),
            _ => {}
        }
    }

    fn raise_lower(&mut self, candidate: Bound<K>) {
        let wins = match (&self.lower, &candidate) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Included(cur) | Bound::Excluded(cur), Bound::Included(new) | Bound::Excluded(new)) => {
                match new.cmp(cur) {
                    Ordering::Greater => true,
                    Ordering::Equal => matches!(candidate, Bound::Excluded(_)),
                    Ordering::Less => false,
                }
            }
        };
        if wins {
            self.lower = candidate;
        }
    }

    fn lower_upper(&mut self, candidate: Bound<K>) {
        let wins = match (&self.upper, &candidate) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Included(cur) | Bound::Excluded(cur), Bound::Included(new) | Bound::Excluded(new)) => {
                match new.cmp(cur) {
                    Ordering::Less => true,
                    Ordering::Equal => matches!(candidate, Bound::Excluded(_)),
                    Ordering::Greater => false,
                }
            }
        };
        if wins {
            self.upper = candidate;
        }
    }

    pub fn is_empty(&self) -> bool {
        if self.never {
            return true;
        }
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        if self.is_empty() {
            return false;
        }
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(lo) => key >= lo,
            Bound::Excluded(lo) => key > lo,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(hi) => key <= hi,
            Bound::Excluded(hi) => key < hi,
        };
        above && below
    }

    pub fn lower(&self) -> Bound<&K> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&K> {
        self.upper.as_ref()
    }

    /// Bounds in the form `BTreeMap::range` takes. Check
    /// [`is_empty`](KeyRange::is_empty) first.
    pub fn bounds(&self) -> (Bound<&K>, Bound<&K>) {
        (self.lower(), self.upper())
    }
}

impl<K: IndexKey> KeyRange<K> {
    /// Narrow by `key op value`, following SQL comparison rules for values
    /// that are not of the key's type.
    pub fn apply(&mut self, op: ConstraintOp, value: &RowValue) {
        match K::key_constraint(op, value) {
            KeyConstraint::Bound(op, key) => self.restrict(op, key),
            KeyConstraint::Always => {}
            KeyConstraint::Never => self.never = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn range_of(terms: &[(ConstraintOp, i64)]) -> KeyRange<i64> {
        let mut range = KeyRange::full();
        for &(op, key) in terms {
            range.restrict(op, key);
        }
        range
    }

    #[test]
    fn operator_codes_round_trip() {
        for code in [2u8, 4, 8, 16, 32, 64, 65, 66, 67, 68, 69, 70, 71, 72, 73, 74, 150, 200] {
            assert_eq!(u8::from(ConstraintOp::from(code)), code);
        }
        assert_eq!(ConstraintOp::from(SQLITE_INDEX_CONSTRAINT_GE as u8), ConstraintOp::Ge);
        assert!(ConstraintOp::Le.is_comparison());
        assert!(!ConstraintOp::Ne.is_comparison());
        assert!(!ConstraintOp::Function(151).is_comparison());
    }

    #[test]
    fn whole_in_lists_read_as_equalities() {
        let data = CStr::from_bytes_with_nul(b"\x01\x20\0").unwrap();
        let plan = Plan { id: PLAN_DESCENDING, data: Some(data) };
        assert_eq!(plan.operators().collect::<Vec<_>>(), [ConstraintOp::Eq, ConstraintOp::Ge]);
        assert!(plan.is_descending());

        let data = CStr::from_bytes_with_nul(b"\x20\0").unwrap();
        let plan = Plan { id: 0, data: Some(data) };
        assert_eq!(plan.key_list::<i64>(&[]).unwrap(), None);
        assert_eq!(Plan { id: 0, data: None }.key_list::<i64>(&[]).unwrap(), None);
    }

    #[test]
    fn tighter_bounds_win() {
        let range = range_of(&[(ConstraintOp::Gt, 1), (ConstraintOp::Ge, 4), (ConstraintOp::Lt, 10), (ConstraintOp::Le, 7)]);
        assert_eq!(range.lower(), Bound::Included(&4));
        assert_eq!(range.upper(), Bound::Included(&7));

        // later, looser bounds do not undo earlier tight ones
        let range = range_of(&[(ConstraintOp::Ge, 4), (ConstraintOp::Gt, 1), (ConstraintOp::Le, 7), (ConstraintOp::Lt, 10)]);
        assert_eq!(range.bounds(), (Bound::Included(&4), Bound::Included(&7)));
    }

    #[test]
    fn excluded_beats_included_on_the_same_key() {
        let range = range_of(&[(ConstraintOp::Ge, 3), (ConstraintOp::Gt, 3)]);
        assert_eq!(range.lower(), Bound::Excluded(&3));
        let range = range_of(&[(ConstraintOp::Lt, 3), (ConstraintOp::Le, 3)]);
        assert_eq!(range.upper(), Bound::Excluded(&3));
    }

    #[test]
    fn conflicting_equalities_are_empty() {
        let range = range_of(&[(ConstraintOp::Eq, 5), (ConstraintOp::Eq, 7)]);
        assert!(range.is_empty());
        assert!(!range.contains(&5));
        assert!(!range.contains(&7));

        let same = range_of(&[(ConstraintOp::Eq, 5), (ConstraintOp::Eq, 5)]);
        assert!(!same.is_empty());
        assert!(same.contains(&5));
    }

    #[test]
    fn inverted_and_degenerate_ranges_are_empty() {
        assert!(range_of(&[(ConstraintOp::Gt, 9), (ConstraintOp::Lt, 2)]).is_empty());
        assert!(range_of(&[(ConstraintOp::Ge, 5), (ConstraintOp::Lt, 5)]).is_empty());
        assert!(range_of(&[(ConstraintOp::Gt, 5), (ConstraintOp::Le, 5)]).is_empty());
        assert!(!range_of(&[(ConstraintOp::Ge, 5), (ConstraintOp::Le, 5)]).is_empty());
        assert!(range_of(&[(ConstraintOp::Eq, 5), (ConstraintOp::Gt, 5)]).is_empty());
    }

    #[test]
    fn non_empty_ranges_drive_btree_range() {
        let map: BTreeMap<i64, &str> = [(1, "a"), (2, "b"), (3, "c")].into_iter().collect();
        let range = range_of(&[(ConstraintOp::Ge, 2), (ConstraintOp::Lt, 10)]);
        assert!(!range.is_empty());
        let hits: Vec<_> = map.range(range.bounds()).map(|(_, v)| *v).collect();
        assert_eq!(hits, ["b", "c"]);
    }

    #[test]
    fn integer_keys_follow_sql_comparisons() {
        use KeyConstraint::*;
        assert_eq!(i64::key_constraint(ConstraintOp::Eq, &RowValue::Null), Never);
        assert_eq!(i64::key_constraint(ConstraintOp::Ge, &RowValue::Integer(3)), Bound(ConstraintOp::Ge, 3));
        assert_eq!(i64::key_constraint(ConstraintOp::Gt, &RowValue::Float(2.5)), Bound(ConstraintOp::Ge, 3));
        assert_eq!(i64::key_constraint(ConstraintOp::Gt, &RowValue::Float(2.0)), Bound(ConstraintOp::Gt, 2));
        assert_eq!(i64::key_constraint(ConstraintOp::Lt, &RowValue::Float(2.5)), Bound(ConstraintOp::Le, 2));
        assert_eq!(i64::key_constraint(ConstraintOp::Le, &RowValue::Float(-2.5)), Bound(ConstraintOp::Le, -3));
        assert_eq!(i64::key_constraint(ConstraintOp::Eq, &RowValue::Float(2.5)), Never);
        assert_eq!(i64::key_constraint(ConstraintOp::Eq, &RowValue::Float(f64::NAN)), Never);
        assert_eq!(i64::key_constraint(ConstraintOp::Gt, &RowValue::Float(1e300)), Never);
        assert_eq!(i64::key_constraint(ConstraintOp::Lt, &RowValue::Float(1e300)), Always);
        assert_eq!(i64::key_constraint(ConstraintOp::Ge, &RowValue::Float(-1e300)), Always);
        assert_eq!(i64::key_constraint(ConstraintOp::Eq, &RowValue::Text("1".into())), Never);
        assert_eq!(i64::key_constraint(ConstraintOp::Lt, &RowValue::Blob(vec![1])), Always);
    }

    #[test]
    fn text_keys_follow_sql_comparisons() {
        use KeyConstraint::*;
        assert_eq!(
            String::key_constraint(ConstraintOp::Le, &RowValue::Text("m".into())),
            Bound(ConstraintOp::Le, "m".to_owned())
        );
        assert_eq!(String::key_constraint(ConstraintOp::Gt, &RowValue::Integer(7)), Always);
        assert_eq!(String::key_constraint(ConstraintOp::Lt, &RowValue::Float(7.5)), Never);
        assert_eq!(String::key_constraint(ConstraintOp::Eq, &RowValue::Blob(vec![])), Never);
        assert_eq!(String::key_constraint(ConstraintOp::Le, &RowValue::Blob(vec![])), Always);
    }

    #[test]
    fn plans_decode_operators_and_direction() {
        let data = CStr::from_bytes_with_nul(b"\x20\x10\0").unwrap();
        let plan = Plan { id: PLAN_DESCENDING, data: Some(data) };
        assert!(plan.is_descending());
        assert_eq!(plan.operators().collect::<Vec<_>>(), [ConstraintOp::Ge, ConstraintOp::Lt]);

        let bare = unsafe { Plan::from_raw(0, ptr::null()) };
        assert!(!bare.is_descending());
        assert_eq!(bare.operators().count(), 0);
        assert!(bare.key_range::<i64>(&[]).unwrap() == KeyRange::full());
    }
}
