//! # sqxx-callable
//!
//! Compile-time introspection for anything that can be called: function
//! items, function pointers, closures and boxed `dyn Fn` values.
//!
//! Given a callable, the traits in this crate expose:
//!
//! - its argument count ([`Callable::ARITY`], [`Arguments::COUNT`])
//! - its argument list as a tuple (the `Args` parameter of [`Callable`])
//! - the type of the Nth argument ([`ArgumentAt`])
//! - its return type ([`Callable::Output`])
//!
//! The `sqxx` crate uses these to register SQL functions without the caller
//! stating how many arguments the function takes.
//!
//! ## Example
//!
//! ```
//! use sqxx_callable::{ArgumentAt, Arguments, Callable, arity_of};
//!
//! fn add(a: i64, b: i64) -> i64 {
//!    a + b
//! }
//!
//! assert_eq!(arity_of(&add), 2);
//! assert_eq!(<(i64, String) as Arguments>::COUNT, 2);
//!
//! let second: <(i64, String) as ArgumentAt<1>>::Type = String::from("x");
//! assert_eq!(second, "x");
//!
//! assert_eq!(add.invoke((2, 3)), 5);
//! ```

mod arguments;
mod callable;

pub use arguments::{ArgumentAt, Arguments};
pub use callable::{Callable, StepCallable, arity_of, step_arity_of};
