//! SQLite connection internals
//!
//! These are public so that they will be in the documentation, but don't use
//! them directly. Instead, use them as a reference on how the library
//! operates.
//!
//! The majority of free functions are glue code either between
//! [`VirtualTable`] and `sqlite3_vtab`, or between [`VirtualCursor`] and
//! `sqlite3_vtab_cursor`. Every one of them runs the user call under
//! [`catch`](crate::error::catch) and reports failures the way SQLite expects
//! for that slot, so neither a Rust error nor a panic ever crosses the ABI.
use std::borrow::Cow;
use std::ffi::CStr;
use std::ops::{Deref, DerefMut};
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use crate::dynamics::{result_error, Value};
use crate::error::{catch, panic_message, Error, Result};
use crate::memory::{self, ForeignBox};
use crate::sqlite3_raw::*;

use super::function::{call_overload, ScalarFunction};
use super::index::{default_best_index, IndexInfo, Plan};
use super::{
    ConflictMode, Creatable, IndexPlanner, ModuleArguments, ModuleConfig, Mutable, Overloadable,
    RecursiveTransactional, Renamable, ShadowNames, Transactional, VirtualCursor, VirtualTable,
};

/// Wrapper for SQLite virtual table `sqlite3_vtab` objects
///
/// Implements Deref, only `.base` is overloaded.
#[repr(C)]
pub struct VTabWrapper<T> {
    base: sqlite3_vtab,
    db: *mut sqlite3,
    declaration: Cow<'static, CStr>,
    inner: T,
}
impl<T> VTabWrapper<T> {
    pub fn declaration(&self) -> &CStr {
        &self.declaration
    }
}
impl<T> Deref for VTabWrapper<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}
impl<T> DerefMut for VTabWrapper<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

/// Wrapper for SQLite virtual table cursor `sqlite3_vtab_cursor` objects
///
/// Implements Deref, only `.base` is overloaded.
#[repr(C)]
pub struct CursorWrapper<C> {
    base: sqlite3_vtab_cursor,
    inner: C,
}
impl<C> Deref for CursorWrapper<C> {
    type Target = C;
    fn deref(&self) -> &C {
        &self.inner
    }
}
impl<C> DerefMut for CursorWrapper<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

/// What `pClientData` points at: the module handed to SQLite and the
/// auxiliary value every connect/create receives.
pub struct ModuleState<T: VirtualTable> {
    pub(crate) module: sqlite3_module,
    pub(crate) aux: Rc<T::Aux>,
}

/// Module destructor, run by SQLite exactly once.
pub unsafe extern "C" fn drop_module_state<T: VirtualTable>(state: *mut c_void) {
    if let Err(err) = catch(|| {
        drop(ForeignBox::from_raw(state as *mut ModuleState<T>));
        Ok(())
    }) {
        error!(error = %err, "module state destructor panicked");
    }
}

unsafe fn table<'a, T>(vtab: *mut sqlite3_vtab) -> &'a mut VTabWrapper<T> {
    &mut *(vtab as *mut VTabWrapper<T>)
}

unsafe fn cursor<'a, C>(cur: *mut sqlite3_vtab_cursor) -> &'a mut CursorWrapper<C> {
    &mut *(cur as *mut CursorWrapper<C>)
}

/// The table a cursor was opened on.
unsafe fn owner<'a, T>(cur: *mut sqlite3_vtab_cursor) -> &'a VTabWrapper<T> {
    &*((*cur).pVtab as *const VTabWrapper<T>)
}

/// Replace the table's error message; SQLite frees it after reporting.
pub unsafe fn set_err_msg(vtab: *mut sqlite3_vtab, message: Option<&str>) {
    let vtab = &mut *vtab;
    if !vtab.zErrMsg.is_null() {
        memory::free(vtab.zErrMsg as *mut c_void);
        vtab.zErrMsg = std::ptr::null_mut();
    }
    if let Some(message) = message {
        if let Ok(copy) = memory::alloc_message(message) {
            vtab.zErrMsg = copy.as_ptr();
        }
    }
}

/// Report `err` through `zErrMsg` and produce the code to return.
pub unsafe fn vtab_error(vtab: *mut sqlite3_vtab, slot: &'static str, err: &Error) -> c_int {
    warn!(slot, error = %err, "virtual table call failed");
    let info = err.info();
    set_err_msg(vtab, info.message.as_deref());
    info.code
}

unsafe fn report(vtab: *mut sqlite3_vtab, slot: &'static str, result: Result<()>) -> c_int {
    match result {
        Ok(()) => SQLITE_OK,
        Err(err) => vtab_error(vtab, slot, &err),
    }
}

unsafe fn connect_error(pz_err: *mut *mut c_char, slot: &'static str, err: &Error) -> c_int {
    warn!(slot, error = %err, "virtual table construction failed");
    let info = err.info();
    if let (Some(message), false) = (info.message, pz_err.is_null()) {
        if let Ok(copy) = memory::alloc_message(&message) {
            *pz_err = copy.as_ptr();
        }
    }
    info.code
}

/// Declare the schema, apply configuration and move the table into
/// SQLite-owned memory.
unsafe fn install<T: VirtualTable>(db: *mut sqlite3, table: T) -> Result<*mut sqlite3_vtab> {
    let declaration = table.declaration();
    check!(sqlite3_declare_vtab(db, declaration.as_ptr()), db)?;
    table.config(&mut ModuleConfig::new(db))?;
    let wrapper = ForeignBox::new(VTabWrapper {
        base: Default::default(),
        db,
        declaration,
        inner: table,
    })?;
    Ok(ForeignBox::into_raw(wrapper) as *mut sqlite3_vtab)
}

unsafe fn construct<T, F>(
    slot: &'static str,
    db: *mut sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut sqlite3_vtab,
    pz_err: *mut *mut c_char,
    make: F,
) -> c_int
where
    T: VirtualTable,
    F: FnOnce(&Rc<T::Aux>, &ModuleArguments) -> Result<T>,
{
    let state = &*(aux as *const ModuleState<T>);
    let result = catch(|| {
        let args = ModuleArguments::from_raw(argc, argv)?;
        debug!(slot, module = %args.module, table = %args.table, "constructing virtual table");
        install(db, make(&state.aux, &args)?)
    });
    match result {
        Ok(vtab) => {
            *pp_vtab = vtab;
            SQLITE_OK
        }
        Err(err) => connect_error(pz_err, slot, &err),
    }
}

/// Attach a table.
/// See [`sqlite3_module.xConnect`](https://sqlite.org/vtab.html#xconnect)
pub unsafe extern "C" fn vtab_connect<T: VirtualTable>(
    db: *mut sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    construct::<T, _>("connect", db, aux, argc, argv, pp_vtab, pz_err, T::connect)
}

/// Create a table with `CREATE VIRTUAL TABLE`.
/// See [`sqlite3_module.xCreate`](https://sqlite.org/vtab.html#xcreate)
pub unsafe extern "C" fn vtab_create<T: Creatable>(
    db: *mut sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    construct::<T, _>("create", db, aux, argc, argv, pp_vtab, pz_err, T::create)
}

/// Release a table.
/// See [`sqlite3_module.xDisconnect`](https://sqlite.org/vtab.html#xdisconnect)
pub unsafe extern "C" fn vtab_disconnect<T: VirtualTable>(vtab: *mut sqlite3_vtab) -> c_int {
    debug!("disconnecting virtual table");
    if let Err(err) = catch(|| {
        drop(ForeignBox::from_raw(vtab as *mut VTabWrapper<T>));
        Ok(())
    }) {
        error!(error = %err, "virtual table destructor panicked");
    }
    SQLITE_OK
}

/// Drop a table and its backing storage.
/// See [`sqlite3_module.xDestroy`](https://sqlite.org/vtab.html#xdestroy)
pub unsafe extern "C" fn vtab_destroy<T: Creatable>(vtab: *mut sqlite3_vtab) -> c_int {
    debug!("destroying virtual table");
    let wrapper = table::<T>(vtab);
    match catch(|| wrapper.inner.destroy()) {
        Ok(()) => vtab_disconnect::<T>(vtab),
        // SQLite keeps the handle on failure, so the table must stay alive
        Err(err) => vtab_error(vtab, "destroy", &err),
    }
}

/// Plan a scan with the default planner.
/// See [`sqlite3_module.xBestIndex`](https://sqlite.org/vtab.html#xbestindex)
pub unsafe extern "C" fn vtab_default_best_index<T: VirtualTable>(
    vtab: *mut sqlite3_vtab,
    info: *mut sqlite3_index_info,
) -> c_int {
    let result = catch(|| default_best_index(&mut IndexInfo::from_raw(info), T::KEY_COLUMN));
    report(vtab, "best_index", result)
}

/// Plan a scan with the table's own planner.
pub unsafe extern "C" fn vtab_best_index<T: IndexPlanner>(
    vtab: *mut sqlite3_vtab,
    info: *mut sqlite3_index_info,
) -> c_int {
    let wrapper = table::<T>(vtab);
    let result = catch(|| wrapper.inner.best_index(&mut IndexInfo::from_raw(info)));
    report(vtab, "best_index", result)
}

/// Construct a cursor.
/// See [`sqlite3_module.xOpen`](https://sqlite.org/vtab.html#xopen)
pub unsafe extern "C" fn vtab_open<T: VirtualTable>(
    vtab: *mut sqlite3_vtab,
    pp_cursor: *mut *mut sqlite3_vtab_cursor,
) -> c_int {
    trace!("opening cursor");
    let wrapper = table::<T>(vtab);
    let result = catch(|| {
        let inner = wrapper.inner.open()?;
        let boxed = ForeignBox::new(CursorWrapper { base: Default::default(), inner })?;
        Ok(ForeignBox::into_raw(boxed) as *mut sqlite3_vtab_cursor)
    });
    match result {
        Ok(cur) => {
            *pp_cursor = cur;
            SQLITE_OK
        }
        Err(err) => vtab_error(vtab, "open", &err),
    }
}

/// Destroy a cursor.
/// See [`sqlite3_module.xClose`](https://sqlite.org/vtab.html#xclose)
pub unsafe extern "C" fn cursor_close<T: VirtualTable>(cur: *mut sqlite3_vtab_cursor) -> c_int {
    trace!("closing cursor");
    if let Err(err) = catch(|| {
        drop(ForeignBox::from_raw(cur as *mut CursorWrapper<T::Cursor>));
        Ok(())
    }) {
        error!(error = %err, "cursor destructor panicked");
    }
    SQLITE_OK
}

/// Start a scan.
/// See [`sqlite3_module.xFilter`](https://sqlite.org/vtab.html#xfilter)
pub unsafe extern "C" fn cursor_filter<T: VirtualTable>(
    cur: *mut sqlite3_vtab_cursor,
    idx_num: c_int,
    idx_str: *const c_char,
    argc: c_int,
    argv: *mut *mut sqlite3_value,
) -> c_int {
    let plan = Plan::from_raw(idx_num, idx_str);
    let values = Value::slice_from_raw(argv, argc);
    trace!(plan_id = idx_num, values = values.len(), "filter");
    let owner = owner::<T>(cur);
    let cursor = cursor::<T::Cursor>(cur);
    let result = catch(|| cursor.inner.filter(&owner.inner, &plan, values));
    report((*cur).pVtab, "filter", result)
}

/// Advance a cursor.
/// See [`sqlite3_module.xNext`](https://sqlite.org/vtab.html#xnext)
pub unsafe extern "C" fn cursor_next<T: VirtualTable>(cur: *mut sqlite3_vtab_cursor) -> c_int {
    let owner = owner::<T>(cur);
    let cursor = cursor::<T::Cursor>(cur);
    let result = catch(|| cursor.inner.next(&owner.inner));
    report((*cur).pVtab, "next", result)
}

/// Return whether the cursor has moved past the end.
/// See [`sqlite3_module.xEof`](https://sqlite.org/vtab.html#xeof)
///
/// There is no way to report an error here, so a panic ends the scan.
pub unsafe extern "C" fn cursor_eof<T: VirtualTable>(cur: *mut sqlite3_vtab_cursor) -> c_int {
    let cursor = cursor::<T::Cursor>(cur);
    match panic::catch_unwind(AssertUnwindSafe(|| cursor.inner.eof())) {
        Ok(eof) => eof as c_int,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "eof panicked, ending scan");
            1
        }
    }
}

/// Extract a column of the current row.
/// See [`sqlite3_module.xColumn`](https://sqlite.org/vtab.html#xcolumn)
pub unsafe extern "C" fn cursor_column<T: VirtualTable>(
    cur: *mut sqlite3_vtab_cursor,
    ctx: *mut sqlite3_context,
    i: c_int,
) -> c_int {
    let owner = owner::<T>(cur);
    let cursor = cursor::<T::Cursor>(cur);
    let no_change = sqlite3_vtab_nochange(ctx) != 0;
    let result = catch(|| cursor.inner.column(&owner.inner, i, no_change)?.push_to(ctx));
    match result {
        Ok(()) => SQLITE_OK,
        Err(err) => {
            warn!(column = i, error = %err, "column failed");
            result_error(ctx, &err);
            err.code()
        }
    }
}

/// Get the rowid of the current row.
/// See [`sqlite3_module.xRowid`](https://sqlite.org/vtab.html#xrowid)
pub unsafe extern "C" fn cursor_rowid<T: VirtualTable>(
    cur: *mut sqlite3_vtab_cursor,
    p_rowid: *mut sqlite3_int64,
) -> c_int {
    let owner = owner::<T>(cur);
    let cursor = cursor::<T::Cursor>(cur);
    match catch(|| cursor.inner.row_id(&owner.inner)) {
        Ok(rowid) => {
            *p_rowid = rowid;
            SQLITE_OK
        }
        Err(err) => vtab_error((*cur).pVtab, "rowid", &err),
    }
}

/// Route one `xUpdate` call to delete, insert or update.
///
/// - `[key]`: delete the row with that key
/// - `[NULL, new, columns...]`: insert
/// - `[old, new, columns...]`: update, possibly moving the row to `new`
pub fn dispatch_update<T: Mutable>(
    table: &mut T,
    args: &[Value<'_>],
    conflict: ConflictMode,
) -> Result<Option<i64>> {
    match args {
        [key] if !key.is_null() => table.delete(*key).map(|()| None),
        [old, new, values @ ..] if old.is_null() => table.insert(*new, values, conflict).map(Some),
        [old, new, values @ ..] => table.update(*old, *new, values, conflict).map(Some),
        _ => Err(Error::misuse("inconsistent key nullability in update")),
    }
}

/// Insert, update or delete a row.
/// See [`sqlite3_module.xUpdate`](https://sqlite.org/vtab.html#xupdate)
pub unsafe extern "C" fn vtab_update<T: Mutable>(
    vtab: *mut sqlite3_vtab,
    argc: c_int,
    argv: *mut *mut sqlite3_value,
    p_rowid: *mut sqlite3_int64,
) -> c_int {
    let wrapper = table::<T>(vtab);
    let args = Value::slice_from_raw(argv, argc);
    let conflict = ConflictMode::from_code(sqlite3_vtab_on_conflict(wrapper.db));
    match catch(|| dispatch_update(&mut wrapper.inner, args, conflict)) {
        Ok(rowid) => {
            if let Some(rowid) = rowid {
                *p_rowid = rowid;
            }
            SQLITE_OK
        }
        Err(err) => vtab_error(vtab, "update", &err),
    }
}

macro_rules! transaction_trampoline {
    ($name:ident, $bound:ident, $method:ident) => {
        /// See [the virtual table documentation](https://sqlite.org/vtab.html).
        pub unsafe extern "C" fn $name<T: $bound>(vtab: *mut sqlite3_vtab) -> c_int {
            trace!(slot = stringify!($method), "transaction");
            let wrapper = table::<T>(vtab);
            let result = catch(|| wrapper.inner.$method());
            report(vtab, stringify!($method), result)
        }
    };
    ($name:ident, $bound:ident, $method:ident, savepoint) => {
        /// See [the virtual table documentation](https://sqlite.org/vtab.html).
        pub unsafe extern "C" fn $name<T: $bound>(vtab: *mut sqlite3_vtab, n: c_int) -> c_int {
            trace!(slot = stringify!($method), savepoint = n, "transaction");
            let wrapper = table::<T>(vtab);
            let result = catch(|| wrapper.inner.$method(n));
            report(vtab, stringify!($method), result)
        }
    };
}

transaction_trampoline!(vtab_begin, Transactional, begin);
transaction_trampoline!(vtab_sync, Transactional, sync);
transaction_trampoline!(vtab_commit, Transactional, commit);
transaction_trampoline!(vtab_rollback, Transactional, rollback);
transaction_trampoline!(vtab_savepoint, RecursiveTransactional, savepoint, savepoint);
transaction_trampoline!(vtab_release, RecursiveTransactional, release, savepoint);
transaction_trampoline!(vtab_rollback_to, RecursiveTransactional, rollback_to, savepoint);

/// Offer a table-specific implementation of a function.
/// See [`sqlite3_module.xFindFunction`](https://sqlite.org/vtab.html#xfindfunction)
pub unsafe extern "C" fn vtab_find_function<T: Overloadable>(
    vtab: *mut sqlite3_vtab,
    n_arg: c_int,
    z_name: *const c_char,
    px_func: *mut Option<ScalarFunction>,
    pp_arg: *mut *mut c_void,
) -> c_int {
    let wrapper = table::<T>(vtab);
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(name) => name,
        Err(_) => return 0,
    };
    let found = panic::catch_unwind(AssertUnwindSafe(|| {
        wrapper.inner.find_function(n_arg, name).map(|f| (f.user_data(), f.find_result()))
    }));
    match found {
        Ok(Some((user_data, result))) => {
            trace!(function = name, arity = n_arg, "overloading function");
            *px_func = Some(call_overload);
            *pp_arg = user_data;
            result
        }
        Ok(None) => 0,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "find_function panicked");
            0
        }
    }
}

/// Rename a table.
/// See [`sqlite3_module.xRename`](https://sqlite.org/vtab.html#xrename)
pub unsafe extern "C" fn vtab_rename<T: Renamable>(vtab: *mut sqlite3_vtab, new_name: *const c_char) -> c_int {
    let wrapper = table::<T>(vtab);
    let result = catch(|| {
        let new_name = CStr::from_ptr(new_name).to_str()?;
        debug!(new_name, "renaming virtual table");
        wrapper.inner.rename(new_name)
    });
    report(vtab, "rename", result)
}

/// Classify a shadow table suffix.
/// See [`sqlite3_module.xShadowName`](https://sqlite.org/vtab.html#xshadowname)
pub unsafe extern "C" fn vtab_shadow_name<T: ShadowNames>(suffix: *const c_char) -> c_int {
    let suffix = match CStr::from_ptr(suffix).to_str() {
        Ok(suffix) => suffix,
        Err(_) => return 0,
    };
    match panic::catch_unwind(|| T::is_shadow_name(suffix)) {
        Ok(shadow) => shadow as c_int,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "shadow name check panicked");
            0
        }
    }
}
