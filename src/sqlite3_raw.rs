//! Raw SQLite ABI surface.
//!
//! Everything the framework needs from the host engine comes through here, so
//! the rest of the crate never names `libsqlite3_sys` directly.
pub use libsqlite3_sys::*;

use std::os::raw::c_int;

lazy_static! {
    static ref LIBRARY_VERSION: c_int = unsafe { sqlite3_libversion_number() };
}

/// The version number of the SQLite library we are linked against,
/// e.g. `3045000` for 3.45.0. Read once.
pub fn library_version() -> c_int {
    *LIBRARY_VERSION
}

/// First release that accepts a module without `xCreate` (eponymous-only).
pub const EPONYMOUS_ONLY_MIN_VERSION: c_int = 3_009_000;
/// First release that calls `xShadowName`.
pub const SHADOW_NAME_MIN_VERSION: c_int = 3_026_000;
/// First release with `sqlite3_vtab_in`, `sqlite3_vtab_distinct` and
/// `sqlite3_vtab_rhs_value`.
pub const VTAB_IN_MIN_VERSION: c_int = 3_038_000;
