//! Integration tests for scalar SQL functions.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::setup_db;
use sqxx::{Blob, Connection, Error, SqlValue, Value, ValueSource, ffi};

fn query_one<T: sqxx::FromValue>(conn: &Connection, sql: &str) -> sqxx::Result<T> {
   let stmt = conn.run(sql)?;
   stmt.val(0)
}

fn add_one(x: i64) -> i64 {
   x + 1
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_function_item() {
   let conn = setup_db();
   conn.create_function("add_one", add_one).unwrap();

   assert_eq!(query_one::<i64>(&conn, "SELECT add_one(41)").unwrap(), 42);
}

#[test]
fn test_closure_arity_from_signature() {
   let conn = setup_db();
   conn
      .create_function("join3", |a: String, b: String, c: String| format!("{a}-{b}-{c}"))
      .unwrap();

   assert_eq!(query_one::<String>(&conn, "SELECT join3('x', 'y', 'z')").unwrap(), "x-y-z");

   let err = conn.prepare("SELECT join3('x', 'y')").unwrap_err();
   assert!(err.message().contains("wrong number of arguments"), "{}", err.message());
}

#[test]
fn test_zero_argument_function() {
   let conn = setup_db();
   conn.create_function("answer", || 42).unwrap();

   assert_eq!(query_one::<i32>(&conn, "SELECT answer()").unwrap(), 42);
}

#[test]
fn test_boxed_dyn_fn() {
   let conn = setup_db();
   let f: Box<dyn Fn(f64) -> f64> = Box::new(|x| x * 2.0);
   conn.create_function("double_it", f).unwrap();

   assert_eq!(query_one::<f64>(&conn, "SELECT double_it(1.25)").unwrap(), 2.5);
}

#[test]
fn test_function_over_table_rows() {
   let conn = setup_db();
   conn.create_deterministic_function("halve", |v: i64| v / 2).unwrap();

   let mut stmt = conn.prepare("SELECT halve(v) FROM items ORDER BY id").unwrap();
   let values: Vec<i64> = stmt.map_rows(|row| row.val(0)).collect::<sqxx::Result<_>>().unwrap();
   assert_eq!(values, vec![5, 11, 16]);
}

#[test]
fn test_overloads_by_arity() {
   let conn = setup_db();
   conn.create_function("pick", |a: i64| a).unwrap();
   conn.create_function("pick", |_a: i64, b: i64| b).unwrap();

   assert_eq!(query_one::<i64>(&conn, "SELECT pick(1)").unwrap(), 1);
   assert_eq!(query_one::<i64>(&conn, "SELECT pick(1, 2)").unwrap(), 2);
}

#[test]
fn test_redefine_drops_previous_callable() {
   let conn = setup_db();
   let marker = Rc::new(());

   let captured = Rc::clone(&marker);
   conn
      .create_function("f", move || Rc::strong_count(&captured) as i64)
      .unwrap();
   assert_eq!(Rc::strong_count(&marker), 2);

   conn.create_function("f", || 0).unwrap();
   assert_eq!(Rc::strong_count(&marker), 1);
   assert_eq!(query_one::<i64>(&conn, "SELECT f()").unwrap(), 0);
}

#[test]
fn test_connection_close_drops_callable() {
   let conn = Connection::open_in_memory().unwrap();
   let marker = Rc::new(());
   let captured = Rc::clone(&marker);
   conn
      .create_function("f", move || Rc::strong_count(&captured) as i64)
      .unwrap();

   assert_eq!(Rc::strong_count(&marker), 2);
   conn.close().unwrap();
   assert_eq!(Rc::strong_count(&marker), 1);
}

#[test]
fn test_remove_function() {
   let conn = setup_db();
   conn.create_function("gone", || 1).unwrap();
   conn.remove_function("gone", 0).unwrap();

   let err = conn.prepare("SELECT gone()").unwrap_err();
   assert!(err.message().contains("no such function"), "{}", err.message());
}

#[test]
fn test_stateful_closure() {
   let conn = setup_db();
   let calls = Rc::new(Cell::new(0));
   let counter = Rc::clone(&calls);
   conn
      .create_function("tick", move || {
         counter.set(counter.get() + 1);
         counter.get()
      })
      .unwrap();

   let mut stmt = conn.prepare("SELECT tick() FROM items").unwrap();
   while stmt.step().unwrap() {}
   assert_eq!(calls.get(), 3);
}

// ============================================================================
// Argument and Result Marshaling
// ============================================================================

#[test]
fn test_argument_kinds() {
   let conn = setup_db();
   conn
      .create_function("describe", |i: i64, d: f64, s: String, b: Vec<u8>, n: Option<i64>| {
         format!("{i}|{d}|{s}|{}|{}", b.len(), n.is_none())
      })
      .unwrap();

   let out: String = query_one(&conn, "SELECT describe(l, d, s, b, n) FROM types").unwrap();
   assert_eq!(out, "3000000000000|4.5|abc|3|true");
}

#[test]
fn test_result_kinds() {
   let conn = setup_db();
   conn.create_function("nothing_fn", || ()).unwrap();
   conn.create_function("maybe", |x: i64| (x > 0).then_some(x)).unwrap();
   conn.create_function("bytes", || vec![1_u8, 2, 3]).unwrap();
   conn.create_function("zeros", || Blob::zeroed(5)).unwrap();
   conn.create_function("label", || "static").unwrap();
   conn.create_function("dynamic", |x: i64| SqlValue::from(x * 10)).unwrap();

   assert_eq!(query_one::<String>(&conn, "SELECT typeof(nothing_fn())").unwrap(), "null");
   assert_eq!(query_one::<Option<i64>>(&conn, "SELECT maybe(-1)").unwrap(), None);
   assert_eq!(query_one::<Option<i64>>(&conn, "SELECT maybe(7)").unwrap(), Some(7));
   assert_eq!(query_one::<Vec<u8>>(&conn, "SELECT bytes()").unwrap(), vec![1, 2, 3]);
   assert_eq!(query_one::<Vec<u8>>(&conn, "SELECT zeros()").unwrap(), vec![0; 5]);
   assert_eq!(query_one::<String>(&conn, "SELECT label()").unwrap(), "static");
   assert_eq!(query_one::<i64>(&conn, "SELECT dynamic(4)").unwrap(), 40);
}

#[test]
fn test_vararg_function() {
   let conn = setup_db();
   conn
      .create_function_vararg("total", |args: &[Value<'_>]| {
         args.iter().map(|v| v.int64()).sum::<i64>()
      })
      .unwrap();

   assert_eq!(query_one::<i64>(&conn, "SELECT total()").unwrap(), 0);
   assert_eq!(query_one::<i64>(&conn, "SELECT total(1, 2, 3, 4)").unwrap(), 10);
}

#[test]
fn test_vararg_sees_value_types() {
   let conn = setup_db();
   conn
      .create_function_vararg("kinds", |args: &[Value<'_>]| {
         args
            .iter()
            .map(|v| format!("{:?}", v.value_type()))
            .collect::<Vec<_>>()
            .join(",")
      })
      .unwrap();

   let out: String = query_one(&conn, "SELECT kinds(1, 1.5, 'a', x'00', NULL)").unwrap();
   assert_eq!(out, "Integer,Float,Text,Blob,Null");
}

#[test]
fn test_value_to_owned() {
   let conn = setup_db();
   conn
      .create_function_vararg("first", |args: &[Value<'_>]| args[0].to_owned_value())
      .unwrap();

   assert_eq!(query_one::<SqlValue>(&conn, "SELECT first('x')").unwrap(), SqlValue::Text("x".into()));
   assert_eq!(query_one::<SqlValue>(&conn, "SELECT first(x'0102')").unwrap(), SqlValue::Blob(vec![1, 2]));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_result_err_keeps_engine_code() {
   let conn = setup_db();
   conn
      .create_function("check_positive", |x: i64| -> sqxx::Result<i64> {
         if x > 0 {
            Ok(x)
         } else {
            Err(Error::new(ffi::SQLITE_CONSTRAINT, "must be positive"))
         }
      })
      .unwrap();

   assert_eq!(query_one::<i64>(&conn, "SELECT check_positive(3)").unwrap(), 3);

   let err = query_one::<i64>(&conn, "SELECT check_positive(-3)").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_CONSTRAINT);
   assert_eq!(err.message(), "must be positive");
}

#[test]
fn test_result_err_foreign_error_is_generic() {
   let conn = setup_db();
   conn
      .create_function("parse", |s: String| s.parse::<i64>())
      .unwrap();

   assert_eq!(query_one::<i64>(&conn, "SELECT parse('12')").unwrap(), 12);

   let err = query_one::<i64>(&conn, "SELECT parse('twelve')").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_ERROR);
   assert!(err.message().contains("invalid digit"), "{}", err.message());
}

#[test]
fn test_nomem_error_maps_to_out_of_memory() {
   let conn = setup_db();
   conn
      .create_function("oom", || -> sqxx::Result<i64> { Err(Error::from_code(ffi::SQLITE_NOMEM)) })
      .unwrap();

   let err = query_one::<i64>(&conn, "SELECT oom()").unwrap_err();
   assert_eq!(err.primary_code(), ffi::SQLITE_NOMEM);
}

#[test]
fn test_invalid_utf8_argument_is_mismatch() {
   let conn = setup_db();
   conn.create_function("echo", |s: String| s).unwrap();

   let err = query_one::<String>(&conn, "SELECT echo(CAST(x'ff' AS TEXT))").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_MISMATCH);
}

#[test]
fn test_panic_becomes_sql_error() {
   let conn = setup_db();
   conn
      .create_function("explode", |x: i64| -> i64 {
         if x == 0 {
            panic!("division by zero requested");
         }
         100 / x
      })
      .unwrap();

   let err = query_one::<i64>(&conn, "SELECT explode(0)").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_MISUSE);
   assert!(err.message().contains("division by zero requested"), "{}", err.message());

   // The connection stays usable afterwards.
   assert_eq!(query_one::<i64>(&conn, "SELECT explode(4)").unwrap(), 25);
}

#[test]
fn test_argument_count_mismatch_is_misuse() {
   let err = <(i64,) as sqxx::FromValues>::from_values(&[]).unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_MISUSE);
   assert_eq!(err.message(), "expected 1 arguments, got 0");

   let conn = setup_db();
   conn
      .create_function_vararg("pair_sum", |args: &[Value<'_>]| -> sqxx::Result<i64> {
         let (a, b) = <(i64, i64) as sqxx::FromValues>::from_values(args)?;
         Ok(a + b)
      })
      .unwrap();

   assert_eq!(query_one::<i64>(&conn, "SELECT pair_sum(2, 3)").unwrap(), 5);

   let err = query_one::<i64>(&conn, "SELECT pair_sum(1, 2, 3)").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_MISUSE);
   assert!(err.message().contains("expected 2 arguments, got 3"), "{}", err.message());
}

#[test]
fn test_registration_rejects_bad_name() {
   let conn = setup_db();
   let err = conn.create_function("bad\0name", || 1).unwrap_err();

   assert_eq!(err.code(), ffi::SQLITE_MISUSE);
}
