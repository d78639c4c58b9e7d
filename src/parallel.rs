//! Optional parallel iteration.
//!
//! The amplitude grid of the refinement loop runs one independent weighted
//! solve per (white, flicker) pair. With the `parallel` feature those solves
//! are spread over rayon's thread pool; without it they run sequentially and
//! the crate has no threading dependency at all.
//!
//! # Usage
//!
//! ```ignore
//! use crate::iter_maybe_parallel;
//!
//! let s0: Vec<_> = iter_maybe_parallel!(pairs)
//!     .map(|(white, flicker)| solve_pair(white, flicker))
//!     .collect();
//! ```

/// Turn an `IntoIterator` into a rayon parallel iterator when the `parallel`
/// feature is enabled, or into a plain iterator otherwise.
///
/// Call sites must also import `rayon::iter::ParallelIterator` under
/// `#[cfg(feature = "parallel")]` to get the adaptor methods.
#[macro_export]
macro_rules! iter_maybe_parallel {
    ($expr:expr) => {{
        #[cfg(feature = "parallel")]
        {
            use rayon::iter::IntoParallelIterator;

            IntoParallelIterator::into_par_iter($expr)
        }
        #[cfg(not(feature = "parallel"))]
        {
            IntoIterator::into_iter($expr)
        }
    }};
}

pub use iter_maybe_parallel;
