#[macro_use]
mod common;

use std::borrow::Cow;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::rc::Rc;

use common::fetch_column;
use rusqlite as sql;
use sqlite3_vtab::dispatch_table;
use sqlite3_vtab::virtual_table::function::ScalarOverload;
use sqlite3_vtab::virtual_table::index::Plan;
use sqlite3_vtab::{
    create_module, Capabilities, Creatable, Error, ModuleArguments, Mutable, Overloadable, Result, RowValue,
    ShadowNames, Value, VirtualCursor, VirtualEponymity, VirtualTable,
};

/// Read-only table over the word list shared with the application.
struct Words {
    words: Rc<RefCell<Vec<String>>>,
    upper: ScalarOverload,
}

impl VirtualTable for Words {
    type Aux = RefCell<Vec<String>>;
    type Cursor = WordsCursor;

    fn connect(aux: &Rc<RefCell<Vec<String>>>, _args: &ModuleArguments) -> Result<Words> {
        Ok(Words {
            words: aux.clone(),
            upper: ScalarOverload::new(|args: &[Value<'_>]| {
                Ok(RowValue::from(format!("<{}>", args[0].as_text()?.to_uppercase())))
            }),
        })
    }

    fn declaration(&self) -> Cow<'static, CStr> {
        Cow::Owned(CString::new("CREATE TABLE x(word TEXT, fragile HIDDEN)").unwrap())
    }

    fn open(&self) -> Result<WordsCursor> {
        Ok(WordsCursor { position: 0, len: 0 })
    }
}

impl Mutable for Words {}

impl Overloadable for Words {
    fn find_function(&self, arity: c_int, name: &str) -> Option<&ScalarOverload> {
        match (arity, name) {
            (1, "upper") => Some(&self.upper),
            _ => None,
        }
    }
}

impl ShadowNames for Words {
    fn is_shadow_name(suffix: &str) -> bool {
        suffix == "data"
    }
}

struct WordsCursor {
    position: usize,
    len: usize,
}

impl VirtualCursor for WordsCursor {
    type Table = Words;

    fn filter(&mut self, table: &Words, _plan: &Plan<'_>, _values: &[Value<'_>]) -> Result<()> {
        self.position = 0;
        self.len = table.words.borrow().len();
        Ok(())
    }

    fn next(&mut self, _table: &Words) -> Result<()> {
        self.position += 1;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.position >= self.len
    }

    fn column(&self, table: &Words, index: c_int, no_change: bool) -> Result<RowValue> {
        match index {
            0 => Ok(table.words.borrow()[self.position].as_str().into()),
            1 if no_change => Ok(RowValue::NoChange),
            1 => panic!("fragile column read"),
            _ => Err(Error::range(index, 2)),
        }
    }

    fn row_id(&self, _table: &Words) -> Result<i64> {
        Ok(self.position as i64)
    }
}

fn word_list(words: &[&str]) -> RefCell<Vec<String>> {
    RefCell::new(words.iter().map(|w| w.to_string()).collect())
}

fn words_connection() -> sql::Connection {
    let conn = sql::Connection::open_in_memory().unwrap();
    unsafe { create_module(conn.handle(), "words", dispatch_table!(Words), word_list(&["alpha", "beta", "gamma"])) }
        .unwrap();
    conn
}

/// Counts from 1 to `rows`. Usable by module name (3 rows) or created with
/// `USING tally(rows=N)`.
struct Tally {
    rows: i64,
}

impl VirtualTable for Tally {
    type Aux = ();
    type Cursor = TallyCursor;

    fn connect(_aux: &Rc<()>, args: &ModuleArguments) -> Result<Tally> {
        let mut rows = 3;
        for parameter in args.parameters() {
            match parameter? {
                ("rows", value) => {
                    rows = value
                        .parse()
                        .map_err(|_| Error::misuse(format!("bad row count '{}'", value)))?
                }
                (key, _) => return Err(Error::misuse(format!("unknown parameter '{}'", key))),
            }
        }
        Ok(Tally { rows })
    }

    fn declaration(&self) -> Cow<'static, CStr> {
        Cow::Owned(CString::new("CREATE TABLE x(n INTEGER)").unwrap())
    }

    fn open(&self) -> Result<TallyCursor> {
        Ok(TallyCursor { n: 1, rows: 0 })
    }
}

impl Creatable for Tally {
    const EPONYMITY: VirtualEponymity = VirtualEponymity::Eponymous;

    fn create(aux: &Rc<()>, args: &ModuleArguments) -> Result<Tally> {
        Tally::connect(aux, args)
    }
}

struct TallyCursor {
    n: i64,
    rows: i64,
}

impl VirtualCursor for TallyCursor {
    type Table = Tally;

    fn filter(&mut self, table: &Tally, _plan: &Plan<'_>, _values: &[Value<'_>]) -> Result<()> {
        self.n = 1;
        self.rows = table.rows;
        Ok(())
    }

    fn next(&mut self, _table: &Tally) -> Result<()> {
        self.n += 1;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.n > self.rows
    }

    fn column(&self, _table: &Tally, _index: c_int, _no_change: bool) -> Result<RowValue> {
        Ok(RowValue::Integer(self.n))
    }

    fn row_id(&self, _table: &Tally) -> Result<i64> {
        Ok(self.n)
    }
}

#[test]
fn capabilities_follow_implemented_traits() {
    let dispatch = dispatch_table!(Words);
    assert_eq!(
        dispatch.capabilities(),
        Capabilities::MUTABLE | Capabilities::OVERLOADABLE | Capabilities::SHADOW_NAME
    );
    assert_eq!(dispatch.eponymity(), VirtualEponymity::EponymousOnly);
    assert_eq!(dispatch.raw().iVersion, 3);
    assert!(dispatch.raw().xBegin.is_none());
    assert!(dispatch.raw().xRename.is_none());
    assert!(Words::is_shadow_name("data"));
    assert!(!Words::is_shadow_name("config"));
}

#[test]
fn aux_reaches_every_table() {
    let conn = words_connection();
    let words: Vec<String> = fetch_column(&conn, "SELECT word FROM words;");
    assert_eq!(words, ["alpha", "beta", "gamma"]);
}

#[test]
fn module_state_is_shared_after_registration() {
    let conn = sql::Connection::open_in_memory().unwrap();
    let words = unsafe { create_module(conn.handle(), "words", dispatch_table!(Words), word_list(&["alpha"])) }
        .unwrap();
    let seen: Vec<String> = fetch_column(&conn, "SELECT word FROM words;");
    assert_eq!(seen, ["alpha"]);

    words.borrow_mut().push("beta".to_owned());
    let seen: Vec<String> = fetch_column(&conn, "SELECT word FROM words;");
    assert_eq!(seen, ["alpha", "beta"]);

    words.borrow_mut().clear();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM words;");
    assert_eq!(rows, 0);
}

#[test]
fn overloaded_function_replaces_builtin() {
    let conn = words_connection();
    let words: Vec<String> = fetch_column(&conn, "SELECT upper(word) FROM words;");
    assert_eq!(words, ["<ALPHA>", "<BETA>", "<GAMMA>"]);
    // not applied to a column of the table: the builtin
    let plain: String = fetch_one_cell!(conn, "SELECT upper('delta');");
    assert_eq!(plain, "DELTA");
}

#[test]
fn mutations_are_refused() {
    let conn = words_connection();
    let err = conn.execute("DELETE FROM words WHERE word = 'beta';", []).unwrap_err();
    assert!(err.to_string().contains("does not support DELETE"), "{}", err);
    let err = conn.execute("UPDATE words SET word = 'b' WHERE word = 'beta';", []).unwrap_err();
    assert!(err.to_string().contains("does not support UPDATE"), "{}", err);
    let words: Vec<String> = fetch_column(&conn, "SELECT word FROM words;");
    assert_eq!(words.len(), 3);
}

#[test]
fn panics_become_errors() {
    let conn = words_connection();
    let err = conn
        .query_row("SELECT fragile FROM words;", [], |r| r.get::<_, Option<String>>(0))
        .unwrap_err();
    assert!(err.to_string().contains("fragile column read"), "{}", err);
    // the connection is still usable
    let words: Vec<String> = fetch_column(&conn, "SELECT word FROM words;");
    assert_eq!(words.len(), 3);
}

#[test]
fn eponymous_only_tables_cannot_be_created() {
    let conn = words_connection();
    assert!(conn.execute_batch("CREATE VIRTUAL TABLE w USING words;").is_err());
}

#[test]
fn registration_replaces_modules() {
    let conn = words_connection();
    unsafe { create_module(conn.handle(), "words", dispatch_table!(Words), word_list(&["one"])) }.unwrap();
    let words: Vec<String> = fetch_column(&conn, "SELECT word FROM words LIMIT 1;");
    assert_eq!(words, ["one"]);
}

#[test]
fn eponymous_tables_share_create_and_connect() {
    let dispatch = dispatch_table!(Tally);
    assert_eq!(dispatch.eponymity(), VirtualEponymity::Eponymous);
    assert!(dispatch.capabilities().contains(Capabilities::CREATE));
    let create = dispatch.raw().xCreate.map(|f| f as usize);
    let connect = dispatch.raw().xConnect.map(|f| f as usize);
    assert!(create.is_some());
    assert_eq!(create, connect);
    let destroy = dispatch.raw().xDestroy.map(|f| f as usize);
    let disconnect = dispatch.raw().xDisconnect.map(|f| f as usize);
    assert_eq!(destroy, disconnect);
}

#[test]
fn eponymous_tables_work_both_ways() {
    let conn = sql::Connection::open_in_memory().unwrap();
    unsafe { create_module(conn.handle(), "tally", dispatch_table!(Tally), ()) }.unwrap();

    let values: Vec<i64> = fetch_column(&conn, "SELECT n FROM tally;");
    assert_eq!(values, [1, 2, 3]);

    conn.execute_batch("CREATE VIRTUAL TABLE five USING tally(rows=5);").unwrap();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM five;");
    assert_eq!(rows, 5);
    assert!(conn.execute_batch("CREATE VIRTUAL TABLE bad USING tally(rows=many);").is_err());

    conn.execute_batch("DROP TABLE five;").unwrap();
    assert!(conn.prepare("SELECT * FROM five;").is_err());
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM tally;");
    assert_eq!(rows, 3);
}
