/// Turn an SQLite return code into a `Result`, logging the failing call site.
///
/// The optional second argument is a database handle whose `sqlite3_errmsg`
/// becomes the error message.
macro_rules! check {
    ($return_code: expr) => { {
        let rc = $return_code;
        if rc != $crate::sqlite3_raw::SQLITE_OK {
            tracing::warn!(rc, file = file!(), line = line!(), "SQLite call failed");
            Err($crate::error::Error::from_code(rc, None))
        } else {
            Ok(())
        }
    } };
    ($return_code: expr, $db: expr) => { {
        let rc = $return_code;
        if rc != $crate::sqlite3_raw::SQLITE_OK {
            tracing::warn!(rc, file = file!(), line = line!(), "SQLite call failed");
            Err($crate::error::Error::from_connection(rc, $db))
        } else {
            Ok(())
        }
    } };
}
