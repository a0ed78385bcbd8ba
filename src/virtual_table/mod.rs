//! Virtual tables backed by Rust types.
//!
//! A table type implements [`VirtualTable`] and its cursor [`VirtualCursor`].
//! Every optional capability SQLite knows about is a separate trait
//! ([`Creatable`], [`Mutable`], [`Transactional`], ...). A [`Dispatch`] is the
//! `sqlite3_module` callback table for one table type; each `with_*` builder
//! method only exists when the type implements the matching trait, so a slot
//! is filled exactly when the capability is there. [`dispatch_table!`] applies
//! every builder method the type qualifies for.
//!
//! [`dispatch_table!`]: crate::dispatch_table
pub mod function;
pub mod index;
pub mod internals;
pub mod introspect;
pub mod ordered_map;
pub mod range;

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::mem;
use std::os::raw::{c_char, c_int, c_void};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::debug;

use crate::dynamics::{RowValue, Value};
use crate::error::{Error, Result};
use crate::memory::ForeignBox;
use crate::sqlite3_raw::*;

use self::function::ScalarOverload;
use self::index::{IndexInfo, Plan};
use self::internals::*;

/// This represents whether a virtual table can be used with
/// `CREATE VIRTUAL TABLE`, directly by its module name, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualEponymity {
    /// Only through `CREATE VIRTUAL TABLE`.
    NonEponymous,
    /// Both ways; create and connect share one slot.
    Eponymous,
    /// Only by module name. No `xCreate` at all.
    EponymousOnly,
}

/// The table half of a virtual table.
///
/// Objects are allocated by SQLite's allocator and live until the table is
/// disconnected. They may be shared by any number of open cursors.
pub trait VirtualTable: Sized {
    /// Module-wide state passed to [`create_module`]. Tables may keep a
    /// clone of the `Rc` to share it with the application.
    type Aux;
    type Cursor: VirtualCursor<Table = Self>;

    /// Column the default planner treats as the ordered key, or `None` to
    /// leave all filtering to SQLite. Use -1 for the rowid.
    const KEY_COLUMN: Option<c_int> = None;

    /// Attach to an existing table, or instantiate an eponymous one.
    fn connect(aux: &Rc<Self::Aux>, args: &ModuleArguments) -> Result<Self>;

    /// Schema as a `CREATE TABLE` statement. Read once per table.
    fn declaration(&self) -> Cow<'static, CStr>;

    /// Called right after the schema is declared.
    fn config(&self, _config: &mut ModuleConfig) -> Result<()> {
        Ok(())
    }

    fn open(&self) -> Result<Self::Cursor>;
}

/// The scan half of a virtual table.
///
/// Cursors never borrow their table; the table is handed in on every call.
pub trait VirtualCursor: Sized {
    type Table: VirtualTable;

    /// Start (or restart) a scan with the plan chosen during planning.
    fn filter(&mut self, table: &Self::Table, plan: &Plan<'_>, values: &[Value<'_>]) -> Result<()>;

    fn next(&mut self, table: &Self::Table) -> Result<()>;

    /// Has no error channel; must not fail.
    fn eof(&self) -> bool;

    /// Value of column `index` in the current row. `no_change` is set
    /// during an UPDATE for columns the statement does not touch, in which
    /// case [`RowValue::NoChange`] may be returned.
    fn column(&self, table: &Self::Table, index: c_int, no_change: bool) -> Result<RowValue>;

    fn row_id(&self, table: &Self::Table) -> Result<i64>;
}

/// Tables with their own `CREATE VIRTUAL TABLE` / `DROP TABLE` lifecycle.
pub trait Creatable: VirtualTable {
    const EPONYMITY: VirtualEponymity = VirtualEponymity::NonEponymous;

    /// Instantiate a new table, creating any backing storage. Eponymous
    /// tables share one slot for create and connect, so only `connect` runs.
    fn create(aux: &Rc<Self::Aux>, args: &ModuleArguments) -> Result<Self>;

    /// Remove backing storage. On failure the table stays connected.
    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Tables accepting INSERT, UPDATE and DELETE.
///
/// Implement the operations you support; the rest report `SQLITE_READONLY`.
/// Even an empty `impl` sets [`Capabilities::MUTABLE`] and fills `xUpdate`,
/// so SQLite routes every INSERT, UPDATE and DELETE to these methods instead
/// of rejecting them when the statement is prepared.
pub trait Mutable: VirtualTable {
    fn delete(&mut self, key: Value<'_>) -> Result<()> {
        let _ = key;
        Err(Error::ReadOnly("table does not support DELETE".to_owned()))
    }

    /// `key` is NULL unless the statement supplied a rowid. `values` holds
    /// every declared column. Returns the rowid of the new row.
    fn insert(&mut self, key: Value<'_>, values: &[Value<'_>], conflict: ConflictMode) -> Result<i64> {
        let _ = (key, values, conflict);
        Err(Error::ReadOnly("table does not support INSERT".to_owned()))
    }

    /// `old_key` differs from `new_key` when the statement changes the rowid.
    fn update(
        &mut self,
        old_key: Value<'_>,
        new_key: Value<'_>,
        values: &[Value<'_>],
        conflict: ConflictMode,
    ) -> Result<i64> {
        let _ = (old_key, new_key, values, conflict);
        Err(Error::ReadOnly("table does not support UPDATE".to_owned()))
    }
}

/// Two-phase commit hooks. `rollback` must restore the state seen at `begin`.
pub trait Transactional: VirtualTable {
    fn begin(&mut self) -> Result<()>;
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Nested transactions.
pub trait RecursiveTransactional: Transactional {
    fn savepoint(&mut self, n: c_int) -> Result<()>;
    /// Fold savepoints `n` and above into their parent.
    fn release(&mut self, n: c_int) -> Result<()>;
    /// Undo everything since savepoint `n`, which stays active.
    fn rollback_to(&mut self, n: c_int) -> Result<()>;
}

pub trait Overloadable: VirtualTable {
    /// An implementation of `name` with `arity` arguments specific to this
    /// table, if it has one.
    fn find_function(&self, arity: c_int, name: &str) -> Option<&ScalarOverload>;
}

pub trait Renamable: VirtualTable {
    fn rename(&mut self, new_name: &str) -> Result<()>;
}

/// Tables owning shadow tables named `<table>_<suffix>`.
pub trait ShadowNames: VirtualTable {
    fn is_shadow_name(suffix: &str) -> bool;
}

/// Tables doing their own query planning instead of the default planner.
pub trait IndexPlanner: VirtualTable {
    fn best_index(&self, info: &mut IndexInfo<'_>) -> Result<()>;
}

bitflags::bitflags! {
    /// Which optional slots a [`Dispatch`] fills.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const CREATE = 1;
        const MUTABLE = 1 << 1;
        const TRANSACTIONAL = 1 << 2;
        const RECURSIVE_TRANSACTIONAL = 1 << 3;
        const OVERLOADABLE = 1 << 4;
        const RENAMABLE = 1 << 5;
        const SHADOW_NAME = 1 << 6;
        const CUSTOM_PLANNER = 1 << 7;
    }
}

/// The `sqlite3_module` for table type `T`.
pub struct Dispatch<T> {
    module: sqlite3_module,
    capabilities: Capabilities,
    eponymity: VirtualEponymity,
    _table: PhantomData<fn() -> T>,
}

impl<T: VirtualTable> Default for Dispatch<T> {
    fn default() -> Dispatch<T> {
        Dispatch::new()
    }
}

impl<T: VirtualTable> Dispatch<T> {
    /// A read-only, eponymous-only table using the default planner.
    pub fn new() -> Dispatch<T> {
        // every slot not named below stays None
        let mut module: sqlite3_module = unsafe { mem::zeroed() };
        module.iVersion = 1;
        module.xConnect = Some(vtab_connect::<T>);
        module.xBestIndex = Some(vtab_default_best_index::<T>);
        module.xDisconnect = Some(vtab_disconnect::<T>);
        module.xOpen = Some(vtab_open::<T>);
        module.xClose = Some(cursor_close::<T>);
        module.xFilter = Some(cursor_filter::<T>);
        module.xNext = Some(cursor_next::<T>);
        module.xEof = Some(cursor_eof::<T>);
        module.xColumn = Some(cursor_column::<T>);
        module.xRowid = Some(cursor_rowid::<T>);
        Dispatch {
            module,
            capabilities: Capabilities::empty(),
            eponymity: VirtualEponymity::EponymousOnly,
            _table: PhantomData,
        }
    }

    pub fn with_create(mut self) -> Dispatch<T>
    where
        T: Creatable,
    {
        match T::EPONYMITY {
            VirtualEponymity::NonEponymous => {
                self.module.xCreate = Some(vtab_create::<T>);
                self.module.xDestroy = Some(vtab_destroy::<T>);
            }
            VirtualEponymity::Eponymous => {
                self.module.xCreate = Some(vtab_connect::<T>);
                self.module.xDestroy = Some(vtab_disconnect::<T>);
            }
            VirtualEponymity::EponymousOnly => {
                self.module.xCreate = None;
                self.module.xDestroy = None;
            }
        }
        self.eponymity = T::EPONYMITY;
        self.capabilities |= Capabilities::CREATE;
        self
    }

    pub fn with_update(mut self) -> Dispatch<T>
    where
        T: Mutable,
    {
        self.module.xUpdate = Some(vtab_update::<T>);
        self.capabilities |= Capabilities::MUTABLE;
        self
    }

    pub fn with_transactions(mut self) -> Dispatch<T>
    where
        T: Transactional,
    {
        self.module.xBegin = Some(vtab_begin::<T>);
        self.module.xSync = Some(vtab_sync::<T>);
        self.module.xCommit = Some(vtab_commit::<T>);
        self.module.xRollback = Some(vtab_rollback::<T>);
        self.capabilities |= Capabilities::TRANSACTIONAL;
        self
    }

    pub fn with_savepoints(self) -> Dispatch<T>
    where
        T: RecursiveTransactional,
    {
        let mut this = self.with_transactions();
        this.module.xSavepoint = Some(vtab_savepoint::<T>);
        this.module.xRelease = Some(vtab_release::<T>);
        this.module.xRollbackTo = Some(vtab_rollback_to::<T>);
        this.module.iVersion = this.module.iVersion.max(2);
        this.capabilities |= Capabilities::RECURSIVE_TRANSACTIONAL;
        this
    }

    pub fn with_find_function(mut self) -> Dispatch<T>
    where
        T: Overloadable,
    {
        self.module.xFindFunction = Some(vtab_find_function::<T>);
        self.capabilities |= Capabilities::OVERLOADABLE;
        self
    }

    pub fn with_rename(mut self) -> Dispatch<T>
    where
        T: Renamable,
    {
        self.module.xRename = Some(vtab_rename::<T>);
        self.capabilities |= Capabilities::RENAMABLE;
        self
    }

    pub fn with_shadow_name(mut self) -> Dispatch<T>
    where
        T: ShadowNames,
    {
        self.module.xShadowName = Some(vtab_shadow_name::<T>);
        self.module.iVersion = 3;
        self.capabilities |= Capabilities::SHADOW_NAME;
        self
    }

    pub fn with_index_planner(mut self) -> Dispatch<T>
    where
        T: IndexPlanner,
    {
        self.module.xBestIndex = Some(vtab_best_index::<T>);
        self.capabilities |= Capabilities::CUSTOM_PLANNER;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn eponymity(&self) -> VirtualEponymity {
        self.eponymity
    }

    pub fn raw(&self) -> &sqlite3_module {
        &self.module
    }
}

/// Register table type `T` under `name` on `db`.
///
/// The dispatch table and `aux` are moved into SQLite-owned memory and freed
/// by SQLite when the module is replaced or the connection closes. The
/// returned handle shares `aux` with every table of the module, so changes
/// made through it are seen by the next statement.
///
/// # Safety
/// `db` must be a valid, open connection. The handle must stay on the thread
/// that uses the connection.
pub unsafe fn create_module<T: VirtualTable>(
    db: *mut sqlite3,
    name: &str,
    dispatch: Dispatch<T>,
    aux: T::Aux,
) -> Result<Rc<T::Aux>> {
    if dispatch.eponymity == VirtualEponymity::EponymousOnly && library_version() < EPONYMOUS_ONLY_MIN_VERSION {
        return Err(Error::misuse(format!(
            "eponymous-only table {} needs SQLite 3.9.0 or later",
            name
        )));
    }
    let c_name = CString::new(name)?;
    let mut module = dispatch.module;
    if module.iVersion >= 3 && library_version() < SHADOW_NAME_MIN_VERSION {
        debug!(module = name, "SQLite too old for shadow names, slot ignored");
        module.iVersion = 2;
    }
    let aux = Rc::new(aux);
    let handle = Rc::clone(&aux);
    let state = ForeignBox::into_raw(ForeignBox::new(ModuleState::<T> { module, aux })?);
    debug!(
        module = name,
        capabilities = ?dispatch.capabilities,
        eponymity = ?dispatch.eponymity,
        "registering virtual table module"
    );
    // SQLite runs the destructor itself when registration fails
    check!(
        sqlite3_create_module_v2(
            db,
            c_name.as_ptr(),
            &(*state).module,
            state as *mut c_void,
            Some(drop_module_state::<T>),
        ),
        db
    )?;
    Ok(handle)
}

/// What SQLite does when an INSERT or UPDATE hits a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictMode {
    Rollback,
    Abort,
    Fail,
    Ignore,
    Replace,
}

impl ConflictMode {
    pub fn from_code(code: c_int) -> ConflictMode {
        match code {
            SQLITE_ROLLBACK => ConflictMode::Rollback,
            SQLITE_FAIL => ConflictMode::Fail,
            SQLITE_IGNORE => ConflictMode::Ignore,
            SQLITE_REPLACE => ConflictMode::Replace,
            _ => ConflictMode::Abort,
        }
    }
}

/// Per-table settings applied through `sqlite3_vtab_config`.
pub struct ModuleConfig {
    db: *mut sqlite3,
}

impl ModuleConfig {
    pub(crate) fn new(db: *mut sqlite3) -> ModuleConfig {
        ModuleConfig { db }
    }

    /// The table may be used from triggers and views in untrusted schemas.
    pub fn set_innocuous(&mut self) -> Result<()> {
        unsafe { check!(sqlite3_vtab_config(self.db, SQLITE_VTAB_INNOCUOUS), self.db) }
    }

    /// The table may only be used from top-level SQL.
    pub fn set_direct_only(&mut self) -> Result<()> {
        unsafe { check!(sqlite3_vtab_config(self.db, SQLITE_VTAB_DIRECTONLY), self.db) }
    }

    /// Declare that `update` can leave the table unchanged on a constraint
    /// failure, letting SQLite honour OR ROLLBACK/IGNORE/REPLACE.
    pub fn set_constraint_support(&mut self, supported: bool) -> Result<()> {
        unsafe {
            check!(
                sqlite3_vtab_config(self.db, SQLITE_VTAB_CONSTRAINT_SUPPORT, supported as c_int),
                self.db
            )
        }
    }
}

/// Arguments of the statement instantiating a table.
///
/// For `CREATE VIRTUAL TABLE t USING m(a, b)` that is module `m`, table `t`
/// and arguments `a`, `b`. Eponymous use has no arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArguments {
    pub module: String,
    pub schema: String,
    pub table: String,
    pub args: SmallVec<[String; 4]>,
}

impl ModuleArguments {
    /// # Safety
    /// `argv` must hold `argc` NUL-terminated strings.
    pub(crate) unsafe fn from_raw(argc: c_int, argv: *const *const c_char) -> Result<ModuleArguments> {
        let mut all: SmallVec<[String; 8]> = SmallVec::new();
        for i in 0..argc.max(0) as usize {
            let arg = *argv.add(i);
            if arg.is_null() {
                all.push(String::new());
            } else {
                all.push(CStr::from_ptr(arg).to_str()?.to_owned());
            }
        }
        if all.len() < 3 {
            return Err(Error::misuse(format!("expected at least 3 module arguments, got {}", all.len())));
        }
        let mut all = all.into_iter();
        let module = all.next().unwrap_or_default();
        let schema = all.next().unwrap_or_default();
        let table = all.next().unwrap_or_default();
        Ok(ModuleArguments { module, schema, table, args: all.collect() })
    }

    /// `key=value` arguments, with the value dequoted.
    pub fn parameters(&self) -> impl Iterator<Item = Result<(&str, Cow<'_, str>)>> + '_ {
        self.args.iter().map(|arg| parameter(arg))
    }
}

/// Strip one level of SQL quoting (`'...'`, `"..."`, `` `...` `` or `[...]`),
/// collapsing doubled quote characters inside.
pub fn dequote(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return Cow::Borrowed(s);
    }
    let (open, close) = (bytes[0], bytes[bytes.len() - 1]);
    let quoted = matches!((open, close), (b'\'', b'\'') | (b'"', b'"') | (b'`', b'`') | (b'[', b']'));
    if !quoted {
        return Cow::Borrowed(s);
    }
    let inner = &s[1..s.len() - 1];
    if open == b'[' {
        return Cow::Borrowed(inner);
    }
    let quote = open as char;
    let doubled: String = [quote, quote].iter().collect();
    if inner.contains(&doubled) {
        Cow::Owned(inner.replace(&doubled, &quote.to_string()))
    } else {
        Cow::Borrowed(inner)
    }
}

/// Split a `key=value` argument, trimming both and dequoting the value.
pub fn parameter(arg: &str) -> Result<(&str, Cow<'_, str>)> {
    match arg.trim().split_once('=') {
        Some((key, value)) => Ok((key.trim(), dequote(value.trim()))),
        None => Err(Error::misuse(format!("illegal argument: '{}'", arg.trim()))),
    }
}
