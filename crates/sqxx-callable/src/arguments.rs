//! Argument tuples.

/// A tuple describing the argument list of a callable.
pub trait Arguments {
   /// Number of arguments in the tuple.
   const COUNT: usize;
}

/// Type of the argument at position `N` (zero-based).
///
/// Implemented for every tuple of up to twelve elements and every valid
/// position within it. Asking for an out-of-range position is a compile
/// error.
pub trait ArgumentAt<const N: usize>: Arguments {
   type Type;
}

macro_rules! count {
   () => { 0usize };
   ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

// `$all` travels as a single token tree so it can be expanded once per
// position without nesting repetitions.
macro_rules! argument_at {
   ([$($all:ident),*] $idx:literal $ty:ident) => {
      impl<$($all),*> ArgumentAt<$idx> for ($($all,)*) {
         type Type = $ty;
      }
   };
}

macro_rules! arguments {
   ($all:tt; $($idx:literal $ty:ident),*) => {
      arguments!(@count $all);
      $( argument_at!($all $idx $ty); )*
   };
   (@count [$($all:ident),*]) => {
      impl<$($all),*> Arguments for ($($all,)*) {
         const COUNT: usize = count!($($all)*);
      }
   };
}

impl Arguments for () {
   const COUNT: usize = 0;
}

arguments!([A0]; 0 A0);
arguments!([A0, A1]; 0 A0, 1 A1);
arguments!([A0, A1, A2]; 0 A0, 1 A1, 2 A2);
arguments!([A0, A1, A2, A3]; 0 A0, 1 A1, 2 A2, 3 A3);
arguments!([A0, A1, A2, A3, A4]; 0 A0, 1 A1, 2 A2, 3 A3, 4 A4);
arguments!([A0, A1, A2, A3, A4, A5]; 0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5);
arguments!([A0, A1, A2, A3, A4, A5, A6]; 0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6);
arguments!(
   [A0, A1, A2, A3, A4, A5, A6, A7];
   0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7
);
arguments!(
   [A0, A1, A2, A3, A4, A5, A6, A7, A8];
   0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8
);
arguments!(
   [A0, A1, A2, A3, A4, A5, A6, A7, A8, A9];
   0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8, 9 A9
);
arguments!(
   [A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10];
   0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8, 9 A9, 10 A10
);
arguments!(
   [A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11];
   0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8, 9 A9, 10 A10, 11 A11
);
