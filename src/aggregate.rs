//! Aggregate SQL functions.
//!
//! Per-group state lives in scratch memory the engine allocates with
//! `sqlite3_aggregate_context` and frees itself after the final call. This
//! module constructs the state in place on the first step, hands out
//! `&mut` access on later steps, and moves it out (running its destructor,
//! never freeing the memory) in the final call. The block is only 8-byte
//! aligned, so a state type that needs more is boxed and the block holds
//! the box.

use std::ffi::c_int;
use std::mem::{self, MaybeUninit};
use std::panic::{self, AssertUnwindSafe};

use libsqlite3_sys as ffi;
use sqxx_callable::{Arguments, StepCallable};

use crate::connection::Connection;
use crate::context::{Context, ToResult};
use crate::function::result_panic;
use crate::value::{FromValues, Value};
use crate::{Error, Result};

/// Layout of the engine-owned scratch block.
///
/// The engine zero-fills the block on allocation, so a fresh block reads
/// as `initialized == false`.
#[repr(C)]
struct AggregateSlot<S> {
   initialized: bool,
   state: MaybeUninit<S>,
}

struct AggregateData<S, St, Fi> {
   zero: S,
   step: St,
   finalize: Fi,
}

/// Alignment of memory from the engine's allocator.
const ENGINE_ALIGN: usize = 8;

/// True when `AggregateSlot<S>` can live directly in the scratch block.
const fn fits_inline<S>() -> bool {
   mem::align_of::<AggregateSlot<S>>() <= ENGINE_ALIGN
}

/// Fetches the scratch block for the current group.
///
/// With `create == false` this never allocates, returning `None` when no
/// step ran for the group.
///
/// # Safety
///
/// Must be called from the step or final callback of an aggregate that
/// stores `T` in its block, and `T` must satisfy [`fits_inline`]. The
/// returned reference must not outlive the callback.
unsafe fn aggregate_slot<'a, T>(ctx: &Context<'_>, create: bool) -> Option<&'a mut AggregateSlot<T>> {
   debug_assert!(fits_inline::<T>());

   let size = if create {
      mem::size_of::<AggregateSlot<T>>() as c_int
   } else {
      0
   };
   let ptr = unsafe { ffi::sqlite3_aggregate_context(ctx.raw(), size) };
   if ptr.is_null() {
      None
   } else {
      // SAFETY: the block is at least `size_of::<AggregateSlot<T>>()` bytes,
      // suitably aligned, and exclusive to this group.
      Some(unsafe { &mut *ptr.cast::<AggregateSlot<T>>() })
   }
}

/// The group's state, built with `init` on first use.
///
/// # Safety
///
/// Same contract as [`aggregate_slot`] with state type `S`.
unsafe fn state_mut<'a, S>(ctx: &Context<'_>, init: impl FnOnce() -> S) -> Option<&'a mut S> {
   if fits_inline::<S>() {
      let slot = unsafe { aggregate_slot::<S>(ctx, true) }?;
      if !slot.initialized {
         slot.state.write(init());
         slot.initialized = true;
      }
      // SAFETY: initialized above or by an earlier step for this group.
      Some(unsafe { slot.state.assume_init_mut() })
   } else {
      let slot = unsafe { aggregate_slot::<Box<S>>(ctx, true) }?;
      if !slot.initialized {
         slot.state.write(Box::new(init()));
         slot.initialized = true;
      }
      Some(unsafe { &mut **slot.state.assume_init_mut() })
   }
}

/// Moves the group's state out and marks the block empty, or `None` when
/// no step ran for the group.
///
/// # Safety
///
/// Same contract as [`aggregate_slot`] with state type `S`.
unsafe fn take_state<S>(ctx: &Context<'_>) -> Option<S> {
   if fits_inline::<S>() {
      match unsafe { aggregate_slot::<S>(ctx, false) } {
         Some(slot) if slot.initialized => {
            slot.initialized = false;
            Some(unsafe { slot.state.assume_init_read() })
         }
         _ => None,
      }
   } else {
      match unsafe { aggregate_slot::<Box<S>>(ctx, false) } {
         Some(slot) if slot.initialized => {
            slot.initialized = false;
            Some(*unsafe { slot.state.assume_init_read() })
         }
         _ => None,
      }
   }
}

unsafe extern "C" fn aggregate_step<S, St, Fi, Args, R>(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) where
   S: Clone,
   St: StepCallable<S, Args>,
   Fi: Fn(S) -> R,
   Args: Arguments + FromValues,
   R: ToResult,
{
   let ctx = unsafe { Context::from_raw(ctx) };
   let args = unsafe { Value::slice_from_raw(argc, argv) };

   let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
      // SAFETY: registered as `*mut AggregateData<S, St, Fi>` by create_aggregate.
      let data = unsafe { &*ctx.user_data().cast::<AggregateData<S, St, Fi>>() };
      let args = Args::from_values(args)?;
      let state = unsafe { state_mut::<S>(&ctx, || data.zero.clone()) }
         .ok_or_else(|| Error::from_code(ffi::SQLITE_NOMEM))?;
      data.step.step(state, args);
      Ok(())
   }));

   match outcome {
      Ok(Ok(())) => {}
      Ok(Err(err)) => ctx.result_callback_error(&err),
      Err(payload) => result_panic(&ctx, "aggregate step", &*payload),
   }
}

unsafe extern "C" fn aggregate_final<S, St, Fi, R>(ctx: *mut ffi::sqlite3_context)
where
   S: Clone,
   Fi: Fn(S) -> R,
   R: ToResult,
{
   let ctx = unsafe { Context::from_raw(ctx) };

   let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      let data = unsafe { &*ctx.user_data().cast::<AggregateData<S, St, Fi>>() };

      // Move the state out and mark the slot empty. The engine frees the
      // block; the state itself is dropped when `finalize` is done with it.
      let state = unsafe { take_state::<S>(&ctx) };

      // An empty group finalizes the zero value.
      let state = state.unwrap_or_else(|| data.zero.clone());
      ctx.result((data.finalize)(state));
   }));

   if let Err(payload) = outcome {
      result_panic(&ctx, "aggregate final", &*payload);
   }
}

impl Connection {
   /// Registers an aggregate function.
   ///
   /// Each group starts from a clone of `zero`. `step` folds one row into
   /// the state and its signature (minus the leading `&mut S`) fixes the SQL
   /// argument count. `finalize` turns the state into the result. A group
   /// with no rows finalizes a fresh clone of `zero`.
   ///
   /// ```
   /// # fn main() -> sqxx::Result<()> {
   /// let conn = sqxx::Connection::open_in_memory()?;
   /// conn.exec("CREATE TABLE t(x); INSERT INTO t VALUES (1), (2), (6);")?;
   /// conn.create_aggregate(
   ///    "mean",
   ///    (0.0_f64, 0_i64),
   ///    |acc: &mut (f64, i64), x: f64| {
   ///       acc.0 += x;
   ///       acc.1 += 1;
   ///    },
   ///    |(sum, n): (f64, i64)| if n == 0 { None } else { Some(sum / n as f64) },
   /// )?;
   ///
   /// let mut stmt = conn.prepare("SELECT mean(x) FROM t")?;
   /// assert!(stmt.step()?);
   /// assert_eq!(stmt.val::<f64>(0)?, 3.0);
   /// # Ok(())
   /// # }
   /// ```
   pub fn create_aggregate<S, St, Fi, Args, R>(
      &self,
      name: &str,
      zero: S,
      step: St,
      finalize: Fi,
   ) -> Result<()>
   where
      S: Clone + 'static,
      St: StepCallable<S, Args> + 'static,
      Fi: Fn(S) -> R + 'static,
      Args: Arguments + FromValues,
      R: ToResult,
   {
      let data = AggregateData {
         zero,
         step,
         finalize,
      };
      self.register(
         name,
         St::ARITY,
         ffi::SQLITE_UTF8,
         data,
         None,
         Some(aggregate_step::<S, St, Fi, Args, R>),
         Some(aggregate_final::<S, St, Fi, R>),
      )
   }

   /// Registers an aggregate whose result is the accumulated state itself.
   pub fn create_simple_aggregate<S, St, Args>(&self, name: &str, zero: S, step: St) -> Result<()>
   where
      S: Clone + ToResult + 'static,
      St: StepCallable<S, Args> + 'static,
      Args: Arguments + FromValues,
   {
      self.create_aggregate(name, zero, step, identity::<S>)
   }

   /// Removes the aggregate registered under `name` with `argc` arguments.
   pub fn remove_aggregate(&self, name: &str, argc: i32) -> Result<()> {
      self.remove_function(name, argc)
   }
}

fn identity<S>(state: S) -> S {
   state
}
