//! SQLite dynamic type wrappers
//!
//! [`Value`] borrows an argument SQLite hands us (filter values, mutation
//! rows, function arguments). [`RowValue`] is what a cursor hands back, and
//! knows how to push itself into a result context.
use std::any::Any;
use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::rc::Rc;
use std::slice;
use std::str;

use crate::error::{Error, Result};
use crate::memory::{self, ForeignBox};
use crate::sqlite3_raw::*;

/// Zero cost wrapper for SQLite value pointers
///
/// These are dynamically typed and have loose typing rules. In most cases it
/// is sufficient to use `.into()` to convert them into a specific type. Keep
/// in mind that doing so may change the underlying value, so multiple
/// conversions of the same value can have intransitive results.
///
/// See [SQLite documentation on values](https://sqlite.org/c3ref/value_blob.html).
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Value<'a> {
    raw: *mut sqlite3_value,
    _borrow: PhantomData<&'a sqlite3_value>,
}

/// The fundamental datatype of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Integer,
    Float,
    Text,
    Blob,
}

impl<'a> Value<'a> {
    /// # Safety
    /// `raw` must stay valid for `'a`.
    pub unsafe fn from_raw(raw: *mut sqlite3_value) -> Value<'a> {
        Value { raw, _borrow: PhantomData }
    }

    /// View an `argv` array as a slice of values.
    ///
    /// # Safety
    /// `argv` must point at `argc` valid values that outlive `'a`.
    pub unsafe fn slice_from_raw(argv: *mut *mut sqlite3_value, argc: c_int) -> &'a [Value<'a>] {
        if argv.is_null() || argc <= 0 {
            &[]
        } else {
            slice::from_raw_parts(argv as *const Value<'a>, argc as usize)
        }
    }

    pub fn as_ptr(&self) -> *mut sqlite3_value {
        self.raw
    }

    pub fn value_type(&self) -> ValueType {
        match unsafe { sqlite3_value_type(self.raw) } {
            SQLITE_INTEGER => ValueType::Integer,
            SQLITE_FLOAT => ValueType::Float,
            SQLITE_TEXT => ValueType::Text,
            SQLITE_BLOB => ValueType::Blob,
            _ => ValueType::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        self.value_type() == ValueType::Null
    }

    pub fn as_i64(&self) -> i64 {
        unsafe { sqlite3_value_int64(self.raw) }
    }

    pub fn as_f64(&self) -> f64 {
        unsafe { sqlite3_value_double(self.raw) }
    }

    /// The value as UTF-8 text. NULL reads as the empty string.
    pub fn as_text(&self) -> Result<&'a str> {
        let bytes = unsafe {
            let text = sqlite3_value_text(self.raw);
            if text.is_null() {
                return Ok("");
            }
            slice::from_raw_parts(text, sqlite3_value_bytes(self.raw) as usize)
        };
        Ok(str::from_utf8(bytes)?)
    }

    /// The value as raw bytes. NULL and zero-length blobs read as empty.
    pub fn as_blob(&self) -> &'a [u8] {
        unsafe {
            let blob = sqlite3_value_blob(self.raw) as *const u8;
            if blob.is_null() {
                &[]
            } else {
                slice::from_raw_parts(blob, sqlite3_value_bytes(self.raw) as usize)
            }
        }
    }

    /// Inside `update`, true for columns the statement did not assign.
    pub fn no_change(&self) -> bool {
        unsafe { sqlite3_value_nochange(self.raw) != 0 }
    }

    /// The object behind a pointer value produced by [`RowValue::Pointer`]
    /// with the same `tag`, if it holds a `T`.
    pub fn pointer<T: Any>(&self, tag: &CStr) -> Option<&'a T> {
        let object = unsafe { sqlite3_value_pointer(self.raw, tag.as_ptr()) } as *const Rc<dyn Any>;
        if object.is_null() {
            return None;
        }
        unsafe { (*object).downcast_ref::<T>() }
    }

    /// Elements of an `IN (...)` list that the planner asked to receive whole
    /// with `IndexInfo::set_in_handling`. Only valid inside `filter`.
    pub fn in_values(&self) -> Result<InValues<'a>> {
        if library_version() < VTAB_IN_MIN_VERSION {
            return Err(Error::misuse("whole IN lists need SQLite 3.38.0 or later"));
        }
        Ok(InValues { list: self.raw, started: false, done: false, _borrow: PhantomData })
    }

    /// Copy out into an owned value. Pointer values read as NULL.
    pub fn to_row_value(&self) -> Result<RowValue> {
        Ok(match self.value_type() {
            ValueType::Null => RowValue::Null,
            ValueType::Integer => RowValue::Integer(self.as_i64()),
            ValueType::Float => RowValue::Float(self.as_f64()),
            ValueType::Text => RowValue::Text(self.as_text()?.to_owned()),
            ValueType::Blob => RowValue::Blob(self.as_blob().to_vec()),
        })
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").field(&self.value_type()).finish()
    }
}

impl From<Value<'_>> for i64 {
    fn from(val: Value<'_>) -> i64 {
        val.as_i64()
    }
}
impl From<Value<'_>> for f64 {
    fn from(val: Value<'_>) -> f64 {
        val.as_f64()
    }
}
/// You can only convert to `Option<String>` because it can be `NULL`.
/// This variant glosses over UTF-8 errors.
impl From<Value<'_>> for Option<String> {
    fn from(val: Value<'_>) -> Option<String> {
        if val.is_null() {
            None
        } else {
            let bytes = unsafe {
                let text = sqlite3_value_text(val.raw);
                if text.is_null() {
                    return Some(String::new());
                }
                slice::from_raw_parts(text, sqlite3_value_bytes(val.raw) as usize)
            };
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
impl From<Value<'_>> for Option<Vec<u8>> {
    fn from(val: Value<'_>) -> Option<Vec<u8>> {
        if val.is_null() {
            None
        } else {
            Some(val.as_blob().to_vec())
        }
    }
}

/// A typed object passed through SQL by reference.
///
/// SQLite only hands the pointer back to code asking for the same `tag`,
/// and [`Value::pointer`] additionally checks the Rust type.
#[derive(Clone)]
pub struct PointerValue {
    object: Rc<dyn Any>,
    tag: &'static CStr,
}

impl PointerValue {
    pub fn new<T: Any>(object: T, tag: &'static CStr) -> PointerValue {
        PointerValue { object: Rc::new(object), tag }
    }

    pub fn tag(&self) -> &'static CStr {
        self.tag
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }
}

impl PartialEq for PointerValue {
    fn eq(&self, other: &PointerValue) -> bool {
        Rc::ptr_eq(&self.object, &other.object) && self.tag == other.tag
    }
}

impl fmt::Debug for PointerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerValue").field("tag", &self.tag).finish()
    }
}

unsafe extern "C" fn release_pointer(object: *mut c_void) {
    memory::destroy_and_free(object as *mut Rc<dyn Any>);
}

/// Iterator over the elements of a whole `IN` list, copied out since SQLite
/// reuses the element between steps.
pub struct InValues<'a> {
    list: *mut sqlite3_value,
    started: bool,
    done: bool,
    _borrow: PhantomData<&'a sqlite3_value>,
}

impl<'a> Iterator for InValues<'a> {
    type Item = Result<RowValue>;

    fn next(&mut self) -> Option<Result<RowValue>> {
        if self.done {
            return None;
        }
        let mut element: *mut sqlite3_value = ptr::null_mut();
        let rc = unsafe {
            if self.started {
                sqlite3_vtab_in_next(self.list, &mut element)
            } else {
                sqlite3_vtab_in_first(self.list, &mut element)
            }
        };
        self.started = true;
        if rc == SQLITE_DONE || (rc == SQLITE_OK && element.is_null()) {
            self.done = true;
            return None;
        }
        if let Err(err) = check!(rc) {
            self.done = true;
            return Some(Err(err));
        }
        Some(unsafe { Value::from_raw(element) }.to_row_value())
    }
}

/// A column value on its way back to SQLite
///
/// In most cases you can use `.into()` to build one. Text and blobs are copied
/// into SQLite's allocator when pushed, so the row can keep its own copy.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Pointer(PointerValue),
    /// Leave the column untouched. Only meaningful when `column` was told
    /// the value is unchanged by an UPDATE; otherwise SQLite reads NULL.
    NoChange,
}

impl RowValue {
    /// Push a value into a result context (not something you should need to
    /// do yourself).
    pub fn push_to(&self, ctx: *mut sqlite3_context) -> Result<()> {
        unsafe {
            match self {
                RowValue::Null => sqlite3_result_null(ctx),
                RowValue::Integer(x) => sqlite3_result_int64(ctx, *x),
                RowValue::Float(x) => sqlite3_result_double(ctx, *x),
                RowValue::Text(x) => match memory::alloc_copy(x.as_bytes())? {
                    Some(copy) => sqlite3_result_text64(
                        ctx,
                        copy.as_ptr() as *const c_char,
                        x.len() as sqlite3_uint64,
                        Some(memory::free_block),
                        SQLITE_UTF8 as u8,
                    ),
                    // static empty string, so the result is TEXT and not NULL
                    None => sqlite3_result_text(ctx, b"\0".as_ptr() as *const c_char, 0, None),
                },
                RowValue::Blob(x) => match memory::alloc_copy(x)? {
                    Some(copy) => sqlite3_result_blob64(
                        ctx,
                        copy.as_ptr() as *const c_void,
                        x.len() as sqlite3_uint64,
                        Some(memory::free_block),
                    ),
                    None => sqlite3_result_zeroblob(ctx, 0),
                },
                RowValue::Pointer(p) => {
                    let object = ForeignBox::into_raw(ForeignBox::new(p.object.clone())?);
                    sqlite3_result_pointer(
                        ctx,
                        object as *mut c_void,
                        p.tag.as_ptr(),
                        Some(release_pointer),
                    )
                }
                RowValue::NoChange => {}
            }
        }
        Ok(())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RowValue::Integer(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RowValue::Text(x) => Some(x),
            _ => None,
        }
    }
}

impl From<f64> for RowValue {
    fn from(x: f64) -> RowValue { RowValue::Float(x) }
}
impl From<i64> for RowValue {
    fn from(x: i64) -> RowValue { RowValue::Integer(x) }
}
impl From<i32> for RowValue {
    fn from(x: i32) -> RowValue { RowValue::Integer(x as i64) }
}
impl From<bool> for RowValue {
    fn from(x: bool) -> RowValue { RowValue::Integer(x as i64) }
}
impl From<String> for RowValue {
    fn from(x: String) -> RowValue { RowValue::Text(x) }
}
impl From<&str> for RowValue {
    fn from(x: &str) -> RowValue { RowValue::Text(x.to_owned()) }
}
impl From<Vec<u8>> for RowValue {
    fn from(x: Vec<u8>) -> RowValue { RowValue::Blob(x) }
}
impl From<PointerValue> for RowValue {
    fn from(x: PointerValue) -> RowValue { RowValue::Pointer(x) }
}
impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(x: Option<T>) -> RowValue {
        x.map_or(RowValue::Null, Into::into)
    }
}

/// Report `err` as the result of a function or column call.
pub(crate) fn result_error(ctx: *mut sqlite3_context, err: &Error) {
    unsafe {
        match err {
            Error::OutOfMemory => sqlite3_result_error_nomem(ctx),
            Error::TooBig => sqlite3_result_error_toobig(ctx),
            other => {
                let info = other.info();
                let message = info.message.unwrap_or_else(|| crate::error::error_string(info.code));
                sqlite3_result_error(ctx, message.as_ptr() as *const c_char, message.len() as c_int);
                if info.code != SQLITE_ERROR {
                    sqlite3_result_error_code(ctx, info.code);
                }
            }
        }
    }
}

