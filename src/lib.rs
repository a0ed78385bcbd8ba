//! SQLite3 virtual tables, written in Rust
//! ======================================
//!
//! Implement [`VirtualTable`](virtual_table::VirtualTable) and
//! [`VirtualCursor`](virtual_table::VirtualCursor) for your types, add
//! whichever capability traits apply (`Creatable`, `Mutable`,
//! `Transactional`, `RecursiveTransactional`, `Overloadable`, `Renamable`,
//! `ShadowNames`, `IndexPlanner`), and register:
//!
//! ```ignore
//! let dispatch = sqlite3_vtab::dispatch_table!(MyTable);
//! let shared = unsafe { sqlite3_vtab::virtual_table::create_module(db, "my_table", dispatch, aux)? };
//! ```
//!
//! Bundled tables
//! ==============
//! - `generate_series(start, stop, step)`: eponymous-only integer series
//! - `ordered_map(key INTEGER, ...)`: in-memory table ordered by its key,
//!   with transactions and savepoints
//!
//! Both are registered by [`register_all`].
#[macro_use]
extern crate const_cstr;
#[macro_use]
extern crate lazy_static;

#[macro_use]
mod macros;
pub mod dynamics;
pub mod error;
pub mod memory;
pub mod sqlite3_raw;
pub mod virtual_table;

pub use dynamics::{InValues, PointerValue, RowValue, Value, ValueType};
pub use error::{Error, Result};
pub use virtual_table::{
    create_module, Capabilities, ConflictMode, Creatable, Dispatch, IndexPlanner, ModuleArguments, ModuleConfig,
    Mutable, Overloadable, RecursiveTransactional, Renamable, ShadowNames, Transactional, VirtualCursor,
    VirtualEponymity, VirtualTable,
};

use sqlite3_raw::sqlite3;

/// Register every bundled table on `db`.
///
/// # Safety
/// `db` must be a valid, open connection.
pub unsafe fn register_all(db: *mut sqlite3) -> Result<()> {
    virtual_table::range::register(db)?;
    virtual_table::ordered_map::register(db)?;
    Ok(())
}
