//! `ordered_map`: an in-memory table ordered by an integer key.
//!
//! ```sql
//! CREATE VIRTUAL TABLE scores USING ordered_map(id INTEGER, name TEXT, score REAL);
//! INSERT INTO scores VALUES (1, 'a', 0.5);
//! SELECT name FROM scores WHERE id >= 2 AND id < 10 ORDER BY id DESC;
//! ```
//!
//! The first declared column is the key and doubles as the rowid. Key
//! comparisons are planned by the default planner, so range scans touch
//! only the matching rows, and `IN (...)` lists become point lookups.
//! Transactions and savepoints work by snapshotting the map.
//!
//! Rows belong to the module's [`OrderedMapStore`], not to the table object,
//! since SQLite reconnects a table after `ALTER TABLE ... RENAME` and after a
//! schema reload.
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::dynamics::{RowValue, Value, ValueType};
use crate::error::{Error, Result};
use crate::sqlite3_raw::*;
use crate::virtual_table::index::{Plan, I64_EDGE};
use crate::virtual_table::{
    create_module, ConflictMode, Creatable, ModuleArguments, ModuleConfig, Mutable, RecursiveTransactional,
    Renamable, Transactional, VirtualCursor, VirtualTable,
};

type Rows = BTreeMap<i64, Vec<RowValue>>;

const DEFAULT_COLUMNS: [&str; 2] = ["key INTEGER", "value"];

/// Rows of every `ordered_map` table on a connection, by `schema.table`.
#[derive(Debug, Default)]
pub struct OrderedMapStore {
    tables: RefCell<HashMap<String, Rc<RefCell<Rows>>>>,
}

impl OrderedMapStore {
    fn qualified(schema: &str, table: &str) -> String {
        format!("{}.{}", schema, table)
    }

    /// Rows of an existing table, or a new empty entry.
    fn attach(&self, schema: &str, table: &str) -> Rc<RefCell<Rows>> {
        let mut tables = self.tables.borrow_mut();
        tables.entry(Self::qualified(schema, table)).or_default().clone()
    }

    /// Empty rows for a new table, replacing anything left under the name.
    fn create(&self, schema: &str, table: &str) -> Rc<RefCell<Rows>> {
        let rows: Rc<RefCell<Rows>> = Rc::default();
        self.tables.borrow_mut().insert(Self::qualified(schema, table), rows.clone());
        rows
    }

    fn rename(&self, schema: &str, from: &str, to: &str) {
        let mut tables = self.tables.borrow_mut();
        if let Some(rows) = tables.remove(&Self::qualified(schema, from)) {
            tables.insert(Self::qualified(schema, to), rows);
        }
    }

    fn remove(&self, schema: &str, table: &str) {
        self.tables.borrow_mut().remove(&Self::qualified(schema, table));
    }

    /// `schema.table` names of the stored tables, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Row count of `schema.table`, if it is stored.
    pub fn row_count(&self, schema: &str, table: &str) -> Option<usize> {
        self.tables
            .borrow()
            .get(&Self::qualified(schema, table))
            .map(|rows| rows.borrow().len())
    }
}

#[derive(Debug)]
pub struct OrderedMap {
    store: Rc<OrderedMapStore>,
    schema: String,
    name: String,
    declaration: CString,
    columns: usize,
    rows: Rc<RefCell<Rows>>,
    /// State at `begin`, while a transaction is open.
    transaction: Option<Rows>,
    /// `(savepoint index, state when it was opened)`, ascending by index.
    savepoints: Vec<(c_int, Rows)>,
}

/// Register `ordered_map` on `db`, returning the store holding its rows.
///
/// # Safety
/// `db` must be a valid, open connection.
pub unsafe fn register(db: *mut sqlite3) -> Result<Rc<OrderedMapStore>> {
    create_module(db, "ordered_map", crate::dispatch_table!(OrderedMap), OrderedMapStore::default())
}

impl OrderedMap {
    fn from_args(store: &Rc<OrderedMapStore>, args: &ModuleArguments, fresh: bool) -> Result<OrderedMap> {
        let columns: Vec<&str> = if args.args.is_empty() {
            DEFAULT_COLUMNS.to_vec()
        } else {
            args.args.iter().map(|c| c.trim()).collect()
        };
        let declaration = CString::new(format!("CREATE TABLE x({})", columns.join(", ")))?;
        let rows = if fresh {
            store.create(&args.schema, &args.table)
        } else {
            store.attach(&args.schema, &args.table)
        };
        Ok(OrderedMap {
            store: store.clone(),
            schema: args.schema.clone(),
            name: args.table.clone(),
            declaration,
            columns: columns.len(),
            rows,
            transaction: None,
            savepoints: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.borrow().is_empty()
    }

    fn next_key(&self) -> Result<i64> {
        match self.rows.borrow().keys().next_back() {
            None => Ok(1),
            Some(last) => last
                .checked_add(1)
                .ok_or_else(|| Error::sqlite(SQLITE_FULL, "ordered_map key space exhausted")),
        }
    }

    /// The key a row should be stored under: the key column, else the rowid
    /// SQLite supplied, else `fallback`. Whole floats inside the `i64` range
    /// count as integers.
    fn key_of(&self, column: Value<'_>, rowid: Value<'_>, fallback: Option<i64>) -> Result<i64> {
        for candidate in [column, rowid] {
            match candidate.value_type() {
                ValueType::Integer => return Ok(candidate.as_i64()),
                ValueType::Float => {
                    let f = candidate.as_f64();
                    if f.fract() == 0.0 && (-I64_EDGE..I64_EDGE).contains(&f) {
                        return Ok(f as i64);
                    }
                    return Err(Error::sqlite(
                        SQLITE_MISMATCH,
                        format!("ordered_map key {} is not a 64-bit integer", f),
                    ));
                }
                ValueType::Null => continue,
                _ => return Err(Error::sqlite(SQLITE_MISMATCH, "ordered_map keys must be integers")),
            }
        }
        match fallback {
            Some(key) => Ok(key),
            None => self.next_key(),
        }
    }

    /// Whether a write to `key` may go ahead. `Ok(false)` means skip it.
    fn resolve_conflict(&self, key: i64, conflict: ConflictMode) -> Result<bool> {
        if !self.rows.borrow().contains_key(&key) {
            return Ok(true);
        }
        match conflict {
            ConflictMode::Replace => Ok(true),
            ConflictMode::Ignore => Ok(false),
            _ => Err(Error::sqlite(
                SQLITE_CONSTRAINT_PRIMARYKEY,
                format!("duplicate key {} in {}", key, self.name),
            )),
        }
    }

    fn check_width(&self, values: &[Value<'_>]) -> Result<()> {
        if values.len() != self.columns {
            return Err(Error::misuse(format!(
                "{} expects {} columns, got {}",
                self.name,
                self.columns,
                values.len()
            )));
        }
        Ok(())
    }
}

impl VirtualTable for OrderedMap {
    type Aux = OrderedMapStore;
    type Cursor = OrderedMapCursor;

    const KEY_COLUMN: Option<c_int> = Some(0);

    fn connect(store: &Rc<OrderedMapStore>, args: &ModuleArguments) -> Result<OrderedMap> {
        OrderedMap::from_args(store, args, false)
    }

    fn declaration(&self) -> Cow<'static, CStr> {
        Cow::Owned(self.declaration.clone())
    }

    fn config(&self, config: &mut ModuleConfig) -> Result<()> {
        config.set_constraint_support(true)
    }

    fn open(&self) -> Result<OrderedMapCursor> {
        Ok(OrderedMapCursor::default())
    }
}

impl Creatable for OrderedMap {
    fn create(store: &Rc<OrderedMapStore>, args: &ModuleArguments) -> Result<OrderedMap> {
        debug!(table = %args.table, columns = ?args.args, "creating ordered_map");
        OrderedMap::from_args(store, args, true)
    }

    fn destroy(&mut self) -> Result<()> {
        debug!(table = %self.name, rows = self.len(), "dropping ordered_map");
        self.store.remove(&self.schema, &self.name);
        self.rows.borrow_mut().clear();
        Ok(())
    }
}

impl Mutable for OrderedMap {
    fn delete(&mut self, key: Value<'_>) -> Result<()> {
        self.rows.borrow_mut().remove(&key.as_i64());
        Ok(())
    }

    fn insert(&mut self, key: Value<'_>, values: &[Value<'_>], conflict: ConflictMode) -> Result<i64> {
        self.check_width(values)?;
        let key = self.key_of(values[0], key, None)?;
        if !self.resolve_conflict(key, conflict)? {
            return Ok(key);
        }
        let row = values[1..].iter().map(Value::to_row_value).collect::<Result<Vec<_>>>()?;
        self.rows.borrow_mut().insert(key, row);
        Ok(key)
    }

    fn update(
        &mut self,
        old_key: Value<'_>,
        new_key: Value<'_>,
        values: &[Value<'_>],
        conflict: ConflictMode,
    ) -> Result<i64> {
        self.check_width(values)?;
        let old_key = old_key.as_i64();
        let key = self.key_of(values[0], new_key, Some(old_key))?;
        let row = {
            let rows = self.rows.borrow();
            let old_row = rows
                .get(&old_key)
                .ok_or_else(|| Error::misuse(format!("no row with key {} in {}", old_key, self.name)))?;
            let mut row = Vec::with_capacity(old_row.len());
            for (value, old) in values[1..].iter().zip(old_row) {
                row.push(if value.no_change() { old.clone() } else { value.to_row_value()? });
            }
            row
        };
        if key != old_key && !self.resolve_conflict(key, conflict)? {
            return Ok(old_key);
        }
        let mut rows = self.rows.borrow_mut();
        rows.remove(&old_key);
        rows.insert(key, row);
        Ok(key)
    }
}

impl Transactional for OrderedMap {
    fn begin(&mut self) -> Result<()> {
        trace!(table = %self.name, "begin");
        self.transaction = Some(self.rows.borrow().clone());
        self.savepoints.clear();
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        trace!(table = %self.name, "commit");
        self.transaction = None;
        self.savepoints.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        trace!(table = %self.name, "rollback");
        if let Some(rows) = self.transaction.take() {
            *self.rows.borrow_mut() = rows;
        }
        self.savepoints.clear();
        Ok(())
    }
}

impl RecursiveTransactional for OrderedMap {
    fn savepoint(&mut self, n: c_int) -> Result<()> {
        self.savepoints.retain(|(index, _)| *index < n);
        let snapshot = self.rows.borrow().clone();
        self.savepoints.push((n, snapshot));
        Ok(())
    }

    fn release(&mut self, n: c_int) -> Result<()> {
        self.savepoints.retain(|(index, _)| *index < n);
        Ok(())
    }

    fn rollback_to(&mut self, n: c_int) -> Result<()> {
        // savepoints opened before this table joined the transaction are
        // covered by the snapshot taken at begin
        let restored = self
            .savepoints
            .iter()
            .rev()
            .find(|(index, _)| *index <= n)
            .map(|(_, rows)| rows)
            .or(self.transaction.as_ref())
            .cloned();
        if let Some(rows) = restored {
            *self.rows.borrow_mut() = rows;
        }
        self.savepoints.retain(|(index, _)| *index <= n);
        Ok(())
    }
}

impl Renamable for OrderedMap {
    fn rename(&mut self, new_name: &str) -> Result<()> {
        debug!(table = %self.name, new_name, "renaming ordered_map");
        self.store.rename(&self.schema, &self.name, new_name);
        self.name = new_name.to_owned();
        Ok(())
    }
}

/// Iterates over a copy of the rows in the planned key range, or of the
/// listed keys when the plan carries whole `IN` lists.
#[derive(Debug, Default)]
pub struct OrderedMapCursor {
    rows: Vec<(i64, Vec<RowValue>)>,
    position: usize,
}

impl OrderedMapCursor {
    fn current(&self) -> Result<&(i64, Vec<RowValue>)> {
        self.rows
            .get(self.position)
            .ok_or_else(|| Error::misuse("ordered_map cursor read past the end"))
    }
}

impl VirtualCursor for OrderedMapCursor {
    type Table = OrderedMap;

    fn filter(&mut self, table: &OrderedMap, plan: &Plan<'_>, values: &[Value<'_>]) -> Result<()> {
        let range = plan.key_range::<i64>(values)?;
        let rows = table.rows.borrow();
        self.rows = if range.is_empty() {
            Vec::new()
        } else if let Some(keys) = plan.key_list::<i64>(values)? {
            keys.into_iter()
                .filter(|key| range.contains(key))
                .filter_map(|key| rows.get(&key).map(|v| (key, v.clone())))
                .collect()
        } else {
            rows.range(range.bounds()).map(|(k, v)| (*k, v.clone())).collect()
        };
        if plan.is_descending() {
            self.rows.reverse();
        }
        self.position = 0;
        trace!(table = %table.name, rows = self.rows.len(), descending = plan.is_descending(), "ordered_map scan");
        Ok(())
    }

    fn next(&mut self, _table: &OrderedMap) -> Result<()> {
        self.position += 1;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.position >= self.rows.len()
    }

    fn column(&self, table: &OrderedMap, index: c_int, no_change: bool) -> Result<RowValue> {
        if index < 0 || index as usize >= table.columns {
            return Err(Error::range(index, table.columns as c_int));
        }
        let (key, values) = self.current()?;
        match index {
            0 => Ok(RowValue::Integer(*key)),
            _ if no_change => Ok(RowValue::NoChange),
            _ => Ok(values.get(index as usize - 1).cloned().unwrap_or(RowValue::Null)),
        }
    }

    fn row_id(&self, _table: &OrderedMap) -> Result<i64> {
        Ok(self.current()?.0)
    }
}
