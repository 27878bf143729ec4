//! Scalar and aggregate function bridge tests against a real engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sqlite_ext::{
    with_memory_database, Accumulator, AggregateFunction, Context, Database, Result,
    ScalarFunction, UpdateAction, Values,
};

struct Factorial;

impl ScalarFunction for Factorial {
    fn invoke(&self, args: &Values<'_>, ctx: &mut Context) -> Result<()> {
        let n = args.get(0).as_i64();
        if n < 0 {
            return Err("factorial of a negative number".into());
        }
        let mut product: i64 = 1;
        for i in 2..=n {
            product *= i;
        }
        ctx.set_i64(product);
        Ok(())
    }
}

#[test]
fn test_scalar_function_factorial() {
    let db = Database::open_in_memory().unwrap();
    db.create_scalar_function("factorial", 1, Factorial).unwrap();

    let (f4, f5, f6): (i64, i64, i64) = db
        .query_row(
            "SELECT factorial(4), factorial(5), factorial(6)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((f4, f5, f6), (24, 120, 720));
    db.close().unwrap();
}

#[test]
fn test_scalar_closure_reverses_text() {
    let db = Database::open_in_memory().unwrap();
    db.create_scalar_function(
        "reverse_text",
        1,
        |args: &Values<'_>, ctx: &mut Context| -> Result<()> {
            match args.get(0).as_str()? {
                Some(s) => ctx.set_text(&s.chars().rev().collect::<String>()),
                None => ctx.set_null(),
            }
            Ok(())
        },
    )
    .unwrap();

    let reversed: String = db
        .query_row("SELECT reverse_text('desserts')", [], |row| row.get(0))
        .unwrap();
    assert_eq!(reversed, "stressed");

    let null: Option<String> = db
        .query_row("SELECT reverse_text(NULL)", [], |row| row.get(0))
        .unwrap();
    assert_eq!(null, None);
    db.close().unwrap();
}

#[test]
fn test_scalar_error_becomes_statement_error() {
    let db = Database::open_in_memory().unwrap();
    db.create_scalar_function(
        "always_fails",
        0,
        |_args: &Values<'_>, _ctx: &mut Context| -> Result<()> { Err("boom".into()) },
    )
    .unwrap();

    let err = db
        .query_row("SELECT always_fails()", [], |row| row.get::<_, i64>(0))
        .unwrap_err();
    assert!(err.to_string().contains("boom"), "got: {err}");

    // The connection stays usable after a failed call.
    let one: i64 = db.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
    assert_eq!(one, 1);
    db.close().unwrap();
}

#[test]
fn test_scalar_blob_round_trip_with_embedded_zeros() {
    let db = Database::open_in_memory().unwrap();
    db.create_scalar_function(
        "blob_identity",
        1,
        |args: &Values<'_>, ctx: &mut Context| -> Result<()> {
            match args.get(0).as_blob() {
                Some(bytes) => ctx.set_blob(bytes),
                None => ctx.set_null(),
            }
            Ok(())
        },
    )
    .unwrap();

    let original = vec![0x00u8, 0x01, 0x02, 0x00, 0x00, 0xff];
    let bytes: Vec<u8> = db
        .query_row(
            "SELECT blob_identity(?1)",
            rusqlite::params![original],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(bytes, original);

    // A zero-length blob is preserved as such, not turned into NULL.
    let empty: Vec<u8> = db
        .query_row("SELECT blob_identity(X'')", [], |row| row.get(0))
        .unwrap();
    assert!(empty.is_empty());
    db.close().unwrap();
}

#[test]
fn test_scalar_zeroblob_result() {
    let db = Database::open_in_memory().unwrap();
    db.create_scalar_function(
        "blank_blob",
        1,
        |args: &Values<'_>, ctx: &mut Context| -> Result<()> {
            ctx.set_zeroblob(args.get(0).as_i64() as i32);
            Ok(())
        },
    )
    .unwrap();

    let bytes: Vec<u8> = db
        .query_row("SELECT blank_blob(5)", [], |row| row.get(0))
        .unwrap();
    assert_eq!(bytes, vec![0u8; 5]);
    db.close().unwrap();
}

struct Product {
    created: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

struct ProductState {
    product: i64,
    saw_row: bool,
    dropped: Arc<AtomicUsize>,
}

impl AggregateFunction for Product {
    fn create_accumulator(&self) -> Box<dyn Accumulator> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ProductState {
            product: 1,
            saw_row: false,
            dropped: self.dropped.clone(),
        })
    }
}

impl Accumulator for ProductState {
    fn step(&mut self, args: &Values<'_>) -> Result<()> {
        self.saw_row = true;
        self.product *= args.get(0).as_i64();
        Ok(())
    }

    fn finish(&mut self, ctx: &mut Context) -> Result<()> {
        if self.saw_row {
            ctx.set_i64(self.product);
        } else {
            ctx.set_null();
        }
        Ok(())
    }
}

impl Drop for ProductState {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_aggregate_product() {
    let created = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    let db = Database::open_in_memory().unwrap();
    db.create_aggregate_function(
        "product",
        1,
        Product {
            created: created.clone(),
            dropped: dropped.clone(),
        },
    )
    .unwrap();

    db.execute_batch("CREATE TABLE nums(v INTEGER); INSERT INTO nums VALUES (2), (3), (4), (7)")
        .unwrap();
    let product: i64 = db
        .query_row("SELECT product(v) FROM nums", [], |row| row.get(0))
        .unwrap();
    assert_eq!(product, 168);

    // Every accumulator the factory made has been retired.
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    db.close().unwrap();
}

#[test]
fn test_aggregate_grouped_accumulators_are_independent() {
    let created = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    let db = Database::open_in_memory().unwrap();
    db.create_aggregate_function(
        "product",
        1,
        Product {
            created: created.clone(),
            dropped: dropped.clone(),
        },
    )
    .unwrap();

    db.execute_batch(
        "CREATE TABLE grouped(k TEXT, v INTEGER);
         INSERT INTO grouped VALUES ('a', 2), ('a', 5), ('b', 3), ('b', 7)",
    )
    .unwrap();

    let rows: Vec<(String, i64)> = db
        .prepare("SELECT k, product(v) FROM grouped GROUP BY k ORDER BY k")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<std::result::Result<_, _>>()
        .unwrap();
    assert_eq!(rows, vec![("a".into(), 10), ("b".into(), 21)]);

    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(dropped.load(Ordering::SeqCst), 2);
    db.close().unwrap();
}

#[test]
fn test_aggregate_over_empty_input_finishes_fresh_accumulator() {
    let created = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    let db = Database::open_in_memory().unwrap();
    db.create_aggregate_function(
        "product",
        1,
        Product {
            created: created.clone(),
            dropped: dropped.clone(),
        },
    )
    .unwrap();

    db.execute_batch("CREATE TABLE empty(v INTEGER)").unwrap();
    let product: Option<i64> = db
        .query_row("SELECT product(v) FROM empty", [], |row| row.get(0))
        .unwrap();
    assert_eq!(product, None);

    assert_eq!(created.load(Ordering::SeqCst), dropped.load(Ordering::SeqCst));
    db.close().unwrap();
}

#[test]
fn test_update_hook_reports_row_changes() {
    let events: Arc<Mutex<Vec<(UpdateAction, String, i64)>>> = Arc::new(Mutex::new(Vec::new()));

    let db = Database::open_in_memory().unwrap();
    db.execute_batch("CREATE TABLE notes(body TEXT)").unwrap();

    let sink = events.clone();
    db.set_update_hook(move |action, _db_name, table, rowid| {
        sink.lock().unwrap().push((action, table.to_owned(), rowid));
    });

    db.execute_batch(
        "INSERT INTO notes VALUES ('first');
         UPDATE notes SET body = 'edited' WHERE rowid = 1;
         DELETE FROM notes WHERE rowid = 1",
    )
    .unwrap();

    {
        let seen = events.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (UpdateAction::Insert, "notes".to_owned(), 1),
                (UpdateAction::Update, "notes".to_owned(), 1),
                (UpdateAction::Delete, "notes".to_owned(), 1),
            ]
        );
    }

    // After clearing, changes go unreported.
    db.clear_update_hook();
    db.execute_batch("INSERT INTO notes VALUES ('quiet')").unwrap();
    assert_eq!(events.lock().unwrap().len(), 3);
    db.close().unwrap();
}

#[test]
fn test_update_hook_replacement_retires_previous_hook() {
    let first: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let second: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    let db = Database::open_in_memory().unwrap();
    db.execute_batch("CREATE TABLE notes(body TEXT)").unwrap();

    let sink = first.clone();
    db.set_update_hook(move |_action, _db_name, _table, rowid| {
        sink.lock().unwrap().push(rowid);
    });
    let sink = second.clone();
    db.set_update_hook(move |_action, _db_name, _table, rowid| {
        sink.lock().unwrap().push(rowid);
    });

    db.execute_batch("INSERT INTO notes VALUES ('only the second hook sees this')")
        .unwrap();
    assert!(first.lock().unwrap().is_empty());
    assert_eq!(*second.lock().unwrap(), vec![1]);
    db.close().unwrap();
}

#[test]
fn test_with_memory_database_runs_and_closes() {
    let answer = with_memory_database(|db| {
        db.create_scalar_function("factorial", 1, Factorial)?;
        let n: i64 = db.query_row("SELECT factorial(5)", [], |row| row.get(0))?;
        Ok(n)
    })
    .unwrap();
    assert_eq!(answer, 120);
}
