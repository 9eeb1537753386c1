//! Integration tests for aggregate SQL functions.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::setup_db;
use sqxx::{Connection, Error, ffi};

/// State whose live instances are counted, to check that every state the
/// engine creates is also dropped.
struct Tracked {
   sum: i64,
   live: Rc<Cell<i64>>,
}

impl Tracked {
   fn new(live: Rc<Cell<i64>>) -> Self {
      live.set(live.get() + 1);
      Self { sum: 0, live }
   }
}

impl Clone for Tracked {
   fn clone(&self) -> Self {
      let mut copy = Tracked::new(Rc::clone(&self.live));
      copy.sum = self.sum;
      copy
   }
}

impl Drop for Tracked {
   fn drop(&mut self) {
      self.live.set(self.live.get() - 1);
   }
}

fn register_tracked_sum(conn: &Connection, live: &Rc<Cell<i64>>) {
   let zero = Tracked::new(Rc::clone(live));
   conn
      .create_aggregate(
         "tracked_sum",
         zero,
         |acc: &mut Tracked, x: i64| acc.sum += x,
         |acc: Tracked| acc.sum,
      )
      .unwrap();
}

// ============================================================================
// Basic Aggregation
// ============================================================================

#[test]
fn test_simple_aggregate_sum() {
   let conn = setup_db();
   conn
      .create_simple_aggregate("my_sum", 0_i64, |acc: &mut i64, x: i64| *acc += x)
      .unwrap();

   let stmt = conn.run("SELECT my_sum(v) FROM items").unwrap();
   assert_eq!(stmt.val::<i64>(0).unwrap(), 66);
}

#[test]
fn test_aggregate_with_finalizer() {
   let conn = setup_db();
   conn
      .create_aggregate(
         "mean",
         (0.0_f64, 0_i64),
         |acc: &mut (f64, i64), x: f64| {
            acc.0 += x;
            acc.1 += 1;
         },
         |(sum, n): (f64, i64)| if n == 0 { None } else { Some(sum / n as f64) },
      )
      .unwrap();

   let stmt = conn.run("SELECT mean(v) FROM items").unwrap();
   assert_eq!(stmt.val::<f64>(0).unwrap(), 22.0);

   let stmt = conn.run("SELECT mean(v) FROM items WHERE id > 100").unwrap();
   assert!(stmt.col(0).val::<Option<f64>>().unwrap().is_none());
}

#[test]
fn test_empty_group_finalizes_zero() {
   let conn = setup_db();
   conn
      .create_simple_aggregate("my_count", 0_i64, |acc: &mut i64, _x: Option<i64>| *acc += 1)
      .unwrap();

   let stmt = conn.run("SELECT my_count(v) FROM items WHERE 0").unwrap();
   assert_eq!(stmt.val::<i64>(0).unwrap(), 0);
}

#[test]
fn test_groups_are_independent() {
   let conn = setup_db();
   conn
      .create_aggregate(
         "sorted_list",
         Vec::new(),
         |acc: &mut Vec<String>, s: String| acc.push(s),
         |mut acc: Vec<String>| {
            acc.sort();
            acc.join(",")
         },
      )
      .unwrap();

   let mut stmt = conn
      .prepare("SELECT id % 2, sorted_list(v) FROM items GROUP BY id % 2 ORDER BY 1")
      .unwrap();
   let groups: Vec<(i64, String)> = stmt
      .map_rows(|row| Ok((row.val(0)?, row.val(1)?)))
      .collect::<sqxx::Result<_>>()
      .unwrap();

   assert_eq!(groups, vec![(0, "22".to_string()), (1, "11,33".to_string())]);
}

#[test]
fn test_multi_argument_aggregate() {
   let conn = setup_db();
   conn
      .create_simple_aggregate("dot", 0_i64, |acc: &mut i64, a: i64, b: i64| *acc += a * b)
      .unwrap();

   let stmt = conn.run("SELECT dot(id, v) FROM items").unwrap();
   assert_eq!(stmt.val::<i64>(0).unwrap(), 11 + 44 + 99);

   let err = conn.prepare("SELECT dot(v) FROM items").unwrap_err();
   assert!(err.message().contains("wrong number of arguments"), "{}", err.message());
}

#[test]
fn test_statement_reruns_aggregate() {
   let conn = setup_db();
   conn
      .create_simple_aggregate("my_max", i64::MIN, |acc: &mut i64, x: i64| *acc = (*acc).max(x))
      .unwrap();

   let mut stmt = conn.prepare("SELECT my_max(v) FROM items").unwrap();
   stmt.run().unwrap();
   assert_eq!(stmt.val::<i64>(0).unwrap(), 33);

   conn.exec("INSERT INTO items VALUES (4, 99)").unwrap();
   stmt.run().unwrap();
   assert_eq!(stmt.val::<i64>(0).unwrap(), 99);
}

// ============================================================================
// State Lifetime
// ============================================================================

#[test]
fn test_every_state_is_dropped() {
   let conn = setup_db();
   let live = Rc::new(Cell::new(0));
   register_tracked_sum(&conn, &live);

   // Only the zero value registered with the function is alive.
   assert_eq!(live.get(), 1);

   let mut stmt = conn
      .prepare("SELECT tracked_sum(v) FROM items GROUP BY id ORDER BY id")
      .unwrap();
   let sums: Vec<i64> = stmt.map_rows(|row| row.val(0)).collect::<sqxx::Result<_>>().unwrap();
   assert_eq!(sums, vec![11, 22, 33]);
   assert_eq!(live.get(), 1);

   drop(stmt);
   conn.remove_aggregate("tracked_sum", 1).unwrap();
   assert_eq!(live.get(), 0);
}

#[test]
fn test_abandoned_group_state_is_dropped() {
   let conn = setup_db();
   let live = Rc::new(Cell::new(0));
   register_tracked_sum(&conn, &live);

   {
      let mut stmt = conn
         .prepare("SELECT tracked_sum(v) FROM items GROUP BY id ORDER BY id")
         .unwrap();
      // Stop after the first group; the second group's state is in flight.
      assert!(stmt.step().unwrap());
   }

   assert_eq!(live.get(), 1);
   conn.close().unwrap();
   assert_eq!(live.get(), 0);
}

/// A state with stricter alignment than the engine's scratch memory.
#[derive(Clone)]
#[repr(align(32))]
struct AlignedTracked(Tracked);

#[test]
fn test_wide_integer_state() {
   let conn = setup_db();
   conn
      .create_aggregate(
         "wide_sum",
         0_u128,
         |acc: &mut u128, x: i64| *acc += (x as u128) << 64,
         |acc: u128| (acc >> 64) as i64,
      )
      .unwrap();

   assert_eq!(conn.run("SELECT wide_sum(v) FROM items").unwrap().val::<i64>(0).unwrap(), 66);
   assert_eq!(
      conn
         .run("SELECT wide_sum(v) FROM items WHERE v > 100")
         .unwrap()
         .val::<i64>(0)
         .unwrap(),
      0
   );
}

#[test]
fn test_over_aligned_state() {
   let conn = setup_db();
   let live = Rc::new(Cell::new(0));
   conn
      .create_aggregate(
         "aligned_sum",
         AlignedTracked(Tracked::new(Rc::clone(&live))),
         |acc: &mut AlignedTracked, x: i64| {
            assert_eq!(&*acc as *const AlignedTracked as usize % 32, 0);
            acc.0.sum += x;
         },
         |acc: AlignedTracked| acc.0.sum,
      )
      .unwrap();

   let mut stmt = conn
      .prepare("SELECT aligned_sum(v) FROM items GROUP BY id ORDER BY id")
      .unwrap();
   let sums: Vec<i64> = stmt.map_rows(|row| row.val(0)).collect::<sqxx::Result<_>>().unwrap();
   assert_eq!(sums, vec![11, 22, 33]);
   drop(stmt);
   assert_eq!(live.get(), 1);

   // An abandoned group is dropped too.
   {
      let mut stmt = conn
         .prepare("SELECT aligned_sum(v) FROM items GROUP BY id ORDER BY id")
         .unwrap();
      assert!(stmt.step().unwrap());
   }
   assert_eq!(live.get(), 1);

   conn.remove_aggregate("aligned_sum", 1).unwrap();
   assert_eq!(live.get(), 0);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_step_argument_error_aborts_query() {
   let conn = setup_db();
   conn
      .create_simple_aggregate("text_len", 0_i64, |acc: &mut i64, s: String| *acc += s.len() as i64)
      .unwrap();

   let err = conn.run("SELECT text_len(CAST(x'ff' AS TEXT))").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_MISMATCH);
}

#[test]
fn test_finalizer_error() {
   let conn = setup_db();
   conn
      .create_aggregate(
         "strict_sum",
         0_i64,
         |acc: &mut i64, x: i64| *acc += x,
         |acc: i64| -> sqxx::Result<i64> {
            if acc > 50 {
               Err(Error::new(ffi::SQLITE_TOOBIG, "sum too large"))
            } else {
               Ok(acc)
            }
         },
      )
      .unwrap();

   let stmt = conn.run("SELECT strict_sum(v) FROM items WHERE id = 1").unwrap();
   assert_eq!(stmt.val::<i64>(0).unwrap(), 11);

   let err = conn.run("SELECT strict_sum(v) FROM items").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_TOOBIG);
   assert_eq!(err.message(), "sum too large");
}

#[test]
fn test_panicking_step_is_reported() {
   let conn = setup_db();
   conn
      .create_simple_aggregate("fragile", 0_i64, |acc: &mut i64, x: i64| {
         if x == 22 {
            panic!("cannot handle 22");
         }
         *acc += x;
      })
      .unwrap();

   let err = conn.run("SELECT fragile(v) FROM items").unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_MISUSE);
   assert!(err.message().contains("cannot handle 22"), "{}", err.message());

   let stmt = conn.run("SELECT fragile(v) FROM items WHERE id <> 2").unwrap();
   assert_eq!(stmt.val::<i64>(0).unwrap(), 44);
}
