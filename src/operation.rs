//! Caller-supplied per-slice analysis
//!
//! A [`SliceOperation`] maps one fetched slice to a value. It is invoked on
//! the executor's compute pool, possibly for many slices at once, so it must
//! be `Send + Sync` and must not rely on shared mutable state.

use crate::errors::BoxError;
use ndarray::ArrayD;

/// Pure function from a dense slice to a result value
pub trait SliceOperation: Send + Sync {
    /// Value produced for each slice
    type Output: Send + 'static;

    /// Analyse one slice
    ///
    /// # Errors
    ///
    /// Any error is attributed to the coordinate of the slice by the executor.
    fn apply(&self, slice: &ArrayD<f32>) -> Result<Self::Output, BoxError>;
}

type BoxedFn<O> = Box<dyn Fn(&ArrayD<f32>) -> Result<O, BoxError> + Send + Sync>;

/// [`SliceOperation`] backed by a closure, see [`from_fn`]
///
/// The closure is stored with its error already boxed, so the operation type
/// depends only on the output type.
pub struct FnOperation<O> {
    f: BoxedFn<O>,
}

impl<O> std::fmt::Debug for FnOperation<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOperation").finish_non_exhaustive()
    }
}

/// Wrap a closure as a [`SliceOperation`]
///
/// ```rust
/// use zslicer::operation::{from_fn, SliceOperation};
/// use ndarray::ArrayD;
///
/// let total = from_fn(|slice: &ArrayD<f32>| Ok::<_, std::convert::Infallible>(slice.sum()));
/// let slice = ArrayD::from_elem(vec![2, 2], 1.5_f32);
/// assert_eq!(total.apply(&slice).unwrap(), 6.0);
/// ```
pub fn from_fn<F, O, E>(f: F) -> FnOperation<O>
where
    F: Fn(&ArrayD<f32>) -> Result<O, E> + Send + Sync + 'static,
    O: Send + 'static,
    E: Into<BoxError>,
{
    FnOperation {
        f: Box::new(move |slice: &ArrayD<f32>| f(slice).map_err(Into::into)),
    }
}

impl<O: Send + 'static> SliceOperation for FnOperation<O> {
    type Output = O;

    fn apply(&self, slice: &ArrayD<f32>) -> Result<O, BoxError> {
        (self.f)(slice)
    }
}
