//! Objects that live in memory owned by SQLite's allocator.
//!
//! Anything SQLite may free on its own (`zErrMsg`, `idxStr`, result text) and
//! anything whose address SQLite holds between calls (tables, cursors, module
//! state) is allocated here. Construction writes the value into a fresh
//! `sqlite3_malloc64` block; destruction runs `drop_in_place` and then hands the
//! block straight back to `sqlite3_free`.
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::os::raw::{c_char, c_void};
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};
use crate::sqlite3_raw::*;

/// SQLite guarantees 8-byte alignment for every allocation.
pub const MALLOC_ALIGN: usize = 8;

/// Allocate `size` bytes from SQLite's allocator.
pub fn allocate(size: usize) -> Result<NonNull<u8>> {
    // sqlite3_malloc64(0) returns NULL, which we would misread as exhaustion
    let size = size.max(1);
    let raw = unsafe { sqlite3_malloc64(size as sqlite3_uint64) };
    NonNull::new(raw as *mut u8).ok_or(Error::OutOfMemory)
}

/// Resize a block obtained from [`allocate`]. On failure the old block is
/// left untouched.
///
/// # Safety
/// `block` must come from this allocator and not have been freed.
pub unsafe fn reallocate(block: NonNull<u8>, size: usize) -> Result<NonNull<u8>> {
    let raw = sqlite3_realloc64(block.as_ptr() as *mut c_void, size.max(1) as sqlite3_uint64);
    NonNull::new(raw as *mut u8).ok_or(Error::OutOfMemory)
}

/// Return a block to SQLite. Null is ignored.
///
/// # Safety
/// `block` must come from this allocator and not have been freed.
pub unsafe fn free(block: *mut c_void) {
    sqlite3_free(block);
}

/// Usable size of a block, which may exceed what was requested.
///
/// # Safety
/// `block` must come from this allocator and not have been freed.
pub unsafe fn usable_size(block: NonNull<u8>) -> usize {
    sqlite3_msize(block.as_ptr() as *mut c_void) as usize
}

/// Move `value` into a pre-sized block.
///
/// # Safety
/// `block` must be at least `size_of::<T>()` bytes, suitably aligned and not
/// hold a live value.
pub unsafe fn construct_in_place<T>(block: NonNull<u8>, value: T) -> NonNull<T> {
    let typed = block.cast::<T>();
    ptr::write(typed.as_ptr(), value);
    typed
}

/// Drop the value at `object` and free its block immediately.
///
/// # Safety
/// `object` must have been produced by [`construct_in_place`] on a block
/// from [`allocate`] (or by [`ForeignBox::into_raw`]), and must not be used
/// afterwards.
pub unsafe fn destroy_and_free<T>(object: *mut T) {
    if object.is_null() {
        return;
    }
    // free even if the destructor unwinds
    struct FreeOnExit(*mut c_void);
    impl Drop for FreeOnExit {
        fn drop(&mut self) {
            unsafe { sqlite3_free(self.0) };
        }
    }
    let _guard = FreeOnExit(object as *mut c_void);
    ptr::drop_in_place(object);
}

/// Owning pointer to a `T` stored in SQLite-allocated memory.
///
/// The value is fully constructed before the pointer exists and is dropped
/// right before its block is freed.
pub struct ForeignBox<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

impl<T> ForeignBox<T> {
    pub fn new(value: T) -> Result<ForeignBox<T>> {
        if mem::align_of::<T>() > MALLOC_ALIGN {
            return Err(Error::misuse(format!(
                "type alignment {} exceeds the {} bytes SQLite's allocator guarantees",
                mem::align_of::<T>(),
                MALLOC_ALIGN
            )));
        }
        let block = allocate(mem::size_of::<T>())?;
        let ptr = unsafe { construct_in_place(block, value) };
        Ok(ForeignBox { ptr, _owns: PhantomData })
    }

    /// Give up ownership; SQLite now holds the only pointer.
    pub fn into_raw(boxed: ForeignBox<T>) -> *mut T {
        let raw = boxed.ptr.as_ptr();
        mem::forget(boxed);
        raw
    }

    /// Take ownership back from SQLite.
    ///
    /// # Safety
    /// `raw` must come from [`ForeignBox::into_raw`] and not be owned elsewhere.
    pub unsafe fn from_raw(raw: *mut T) -> ForeignBox<T> {
        ForeignBox { ptr: NonNull::new_unchecked(raw), _owns: PhantomData }
    }
}

impl<T> Deref for ForeignBox<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for ForeignBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for ForeignBox<T> {
    fn drop(&mut self) {
        unsafe { destroy_and_free(self.ptr.as_ptr()) }
    }
}

/// Copy `bytes` into a NUL-terminated string SQLite can later `sqlite3_free`.
pub fn alloc_bytes_cstr(bytes: &[u8]) -> Result<NonNull<c_char>> {
    if bytes.contains(&0) {
        return Err(Error::misuse("string handed to SQLite contains a NUL byte"));
    }
    let block = allocate(bytes.len() + 1)?;
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), block.as_ptr(), bytes.len());
        *block.as_ptr().add(bytes.len()) = 0;
    }
    Ok(block.cast())
}

/// [`alloc_bytes_cstr`] for text, truncating at the first NUL instead of
/// failing. Used for error messages, which must always get through.
pub fn alloc_message(message: &str) -> Result<NonNull<c_char>> {
    let bytes = message.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    alloc_bytes_cstr(&bytes[..end])
}

/// Copy `bytes` into an SQLite block without a terminator, for result values.
/// Returns `None` for empty input, which SQLite treats specially.
pub fn alloc_copy(bytes: &[u8]) -> Result<Option<NonNull<u8>>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let block = allocate(bytes.len())?;
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), block.as_ptr(), bytes.len()) };
    Ok(Some(block))
}

/// Destructor SQLite calls on blocks from [`alloc_copy`].
pub unsafe extern "C" fn free_block(block: *mut c_void) {
    sqlite3_free(block);
}
