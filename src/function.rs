//! Scalar SQL functions backed by Rust callables.
//!
//! Registration hands the engine one opaque pointer (the boxed callable)
//! plus monomorphized `extern "C"` trampolines. The engine owns the box from
//! then on and releases it through [`drop_boxed`] when the function is
//! removed, redefined, or the connection closes.

use std::ffi::{c_int, c_void};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use libsqlite3_sys as ffi;
use sqxx_callable::{Arguments, Callable};
use tracing::{debug, error};

use crate::connection::Connection;
use crate::context::{Context, ToResult};
use crate::error::{guard, panic_message};
use crate::util::str_to_cstring;
use crate::value::{FromValues, Value};
use crate::{Error, Result};

pub(crate) type XFunc =
   unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value);
pub(crate) type XFinal = unsafe extern "C" fn(*mut ffi::sqlite3_context);

/// Frees a `Box<T>` previously leaked with `Box::into_raw`.
pub(crate) unsafe extern "C" fn drop_boxed<T>(ptr: *mut c_void) {
   guard("destructor", (), || {
      // SAFETY: ptr came from Box::<T>::into_raw and is released exactly once.
      drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
   })
}

/// Reports a panic from user code as `SQLITE_MISUSE`, keeping the panic
/// text as the error message.
pub(crate) fn result_panic(ctx: &Context<'_>, name: &str, payload: &(dyn std::any::Any + Send)) {
   let message = panic_message(payload);
   error!(function = name, "panic in SQL function: {message}");
   ctx.result_error(message);
   ctx.result_misuse();
}

unsafe extern "C" fn call_scalar<F, Args>(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) where
   F: Callable<Args>,
   Args: Arguments + FromValues,
   F::Output: ToResult,
{
   // SAFETY: the engine passes a live context and `argc` argument handles.
   let ctx = unsafe { Context::from_raw(ctx) };
   let args = unsafe { Value::slice_from_raw(argc, argv) };

   let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      // SAFETY: user data was registered as a `*mut F` by `register`.
      let f = unsafe { &*ctx.user_data().cast::<F>() };
      match Args::from_values(args) {
         Ok(args) => ctx.result(f.invoke(args)),
         Err(err) => ctx.result_callback_error(&err),
      }
   }));

   if let Err(payload) = outcome {
      result_panic(&ctx, "scalar", &*payload);
   }
}

unsafe extern "C" fn call_vararg<F, R>(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) where
   F: Fn(&[Value<'_>]) -> R,
   R: ToResult,
{
   // SAFETY: the engine passes a live context and `argc` argument handles.
   let ctx = unsafe { Context::from_raw(ctx) };
   let args = unsafe { Value::slice_from_raw(argc, argv) };

   let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      // SAFETY: user data was registered as a `*mut F` by `register`.
      let f = unsafe { &*ctx.user_data().cast::<F>() };
      ctx.result(f(args));
   }));

   if let Err(payload) = outcome {
      result_panic(&ctx, "vararg", &*payload);
   }
}

impl Connection {
   /// Registers `f` as an SQL function.
   ///
   /// The number of SQL arguments is taken from `f`'s signature. Each
   /// argument is converted with [`crate::FromValue`] and the return value is
   /// written with [`ToResult`]; returning `Err` fails the SQL call.
   /// Redefining a name and argument count replaces the earlier function.
   ///
   /// ```
   /// # fn main() -> sqxx::Result<()> {
   /// let conn = sqxx::Connection::open_in_memory()?;
   /// conn.create_function("plus", |a: i64, b: i64| a + b)?;
   ///
   /// let mut stmt = conn.prepare("SELECT plus(2, 3)")?;
   /// assert!(stmt.step()?);
   /// assert_eq!(stmt.val::<i64>(0)?, 5);
   /// # Ok(())
   /// # }
   /// ```
   pub fn create_function<F, Args>(&self, name: &str, f: F) -> Result<()>
   where
      F: Callable<Args> + 'static,
      Args: Arguments + FromValues,
      F::Output: ToResult,
   {
      self.register(
         name,
         F::ARITY,
         ffi::SQLITE_UTF8,
         f,
         Some(call_scalar::<F, Args>),
         None,
         None,
      )
   }

   /// Like [`Connection::create_function`] but tells the query planner the
   /// function always returns the same result for the same arguments.
   pub fn create_deterministic_function<F, Args>(&self, name: &str, f: F) -> Result<()>
   where
      F: Callable<Args> + 'static,
      Args: Arguments + FromValues,
      F::Output: ToResult,
   {
      self.register(
         name,
         F::ARITY,
         ffi::SQLITE_UTF8 | ffi::SQLITE_DETERMINISTIC,
         f,
         Some(call_scalar::<F, Args>),
         None,
         None,
      )
   }

   /// Registers a function accepting any number of arguments.
   pub fn create_function_vararg<F, R>(&self, name: &str, f: F) -> Result<()>
   where
      F: Fn(&[Value<'_>]) -> R + 'static,
      R: ToResult,
   {
      let c_name = str_to_cstring(name)?;
      self.register_raw(
         &c_name,
         -1,
         ffi::SQLITE_UTF8,
         f,
         Some(call_vararg::<F, R>),
         None,
         None,
      )
   }

   /// Removes the function registered under `name` with `argc` arguments
   /// (`-1` for a variadic one).
   pub fn remove_function(&self, name: &str, argc: i32) -> Result<()> {
      let c_name = str_to_cstring(name)?;
      debug!(name, argc, "removing SQL function");
      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            self.handle(),
            c_name.as_ptr(),
            argc,
            ffi::SQLITE_UTF8,
            ptr::null_mut(),
            None,
            None,
            None,
            None,
         )
      };
      unsafe { Error::check(self.handle(), rc) }
   }

   #[allow(clippy::too_many_arguments)]
   pub(crate) fn register<T: 'static>(
      &self,
      name: &str,
      arity: usize,
      flags: c_int,
      data: T,
      x_func: Option<XFunc>,
      x_step: Option<XFunc>,
      x_final: Option<XFinal>,
   ) -> Result<()> {
      let c_name = str_to_cstring(name)?;
      let n_arg = c_int::try_from(arity)
         .map_err(|_| Error::new(ffi::SQLITE_RANGE, format!("too many arguments: {arity}")))?;
      self.register_raw(&c_name, n_arg, flags, data, x_func, x_step, x_final)
   }

   #[allow(clippy::too_many_arguments)]
   fn register_raw<T: 'static>(
      &self,
      name: &std::ffi::CStr,
      n_arg: c_int,
      flags: c_int,
      data: T,
      x_func: Option<XFunc>,
      x_step: Option<XFunc>,
      x_final: Option<XFinal>,
   ) -> Result<()> {
      // Zero-sized callables (function items, captureless closures) need
      // neither an allocation nor a destructor.
      let destroy: Option<unsafe extern "C" fn(*mut c_void)> =
         if mem::size_of::<T>() == 0 && !mem::needs_drop::<T>() {
            None
         } else {
            Some(drop_boxed::<T>)
         };
      let user_data = Box::into_raw(Box::new(data)).cast::<c_void>();

      debug!(name = ?name, n_arg, "registering SQL function");

      // On failure the engine invokes `destroy` itself, so the box must not
      // be released here.
      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            self.handle(),
            name.as_ptr(),
            n_arg,
            flags,
            user_data,
            x_func,
            x_step,
            x_final,
            destroy,
         )
      };
      unsafe { Error::check(self.handle(), rc) }
   }
}
