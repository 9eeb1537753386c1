//! Callable traits.
//!
//! Blanket implementations cover every `Fn` of up to twelve arguments, so
//! function items, function pointers, closures and `Box<dyn Fn(..)>` all
//! qualify. The `Args` type parameter keeps the implementations coherent:
//! a closure implements exactly one `Fn` signature, so `Args` is always
//! inferred from the closure itself.

use crate::Arguments;

/// A callable whose argument list is the tuple `Args`.
pub trait Callable<Args: Arguments> {
   /// Return type.
   type Output;

   /// Number of arguments taken.
   const ARITY: usize = Args::COUNT;

   /// Calls with the arguments unpacked from `args`.
   fn invoke(&self, args: Args) -> Self::Output;
}

/// An aggregate step callable: `Fn(&mut State, A0, .., An)`.
///
/// `ARITY` counts only the SQL-visible arguments, not the state.
pub trait StepCallable<State, Args: Arguments> {
   /// Number of SQL arguments taken.
   const ARITY: usize = Args::COUNT;

   /// Folds one row into `state`.
   fn step(&self, state: &mut State, args: Args);
}

/// Arity of `f`, deduced from its signature.
pub fn arity_of<F, Args>(_f: &F) -> usize
where
   F: Callable<Args>,
   Args: Arguments,
{
   F::ARITY
}

/// Arity of an aggregate step callable, not counting the state argument.
pub fn step_arity_of<F, S, Args>(_f: &F) -> usize
where
   F: StepCallable<S, Args>,
   Args: Arguments,
{
   F::ARITY
}

macro_rules! callable {
   ($($arg:ident),*) => {
      impl<Func, Ret, $($arg),*> Callable<($($arg,)*)> for Func
      where
         Func: Fn($($arg),*) -> Ret,
      {
         type Output = Ret;

         #[allow(non_snake_case)]
         fn invoke(&self, args: ($($arg,)*)) -> Ret {
            let ($($arg,)*) = args;
            (self)($($arg),*)
         }
      }

      impl<Func, State, $($arg),*> StepCallable<State, ($($arg,)*)> for Func
      where
         Func: Fn(&mut State, $($arg),*),
      {
         #[allow(non_snake_case)]
         fn step(&self, state: &mut State, args: ($($arg,)*)) {
            let ($($arg,)*) = args;
            (self)(state, $($arg),*)
         }
      }
   };
}

callable!();
callable!(A0);
callable!(A0, A1);
callable!(A0, A1, A2);
callable!(A0, A1, A2, A3);
callable!(A0, A1, A2, A3, A4);
callable!(A0, A1, A2, A3, A4, A5);
callable!(A0, A1, A2, A3, A4, A5, A6);
callable!(A0, A1, A2, A3, A4, A5, A6, A7);
callable!(A0, A1, A2, A3, A4, A5, A6, A7, A8);
callable!(A0, A1, A2, A3, A4, A5, A6, A7, A8, A9);
callable!(A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
callable!(A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);
