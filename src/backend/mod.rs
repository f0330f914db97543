//! Tensor backend interface
//!
//! The execution core never computes gradients itself; it talks to a
//! [`ComputationHandler`] for every numeric operation it needs (replica
//! merging, block transfer, session bracketing). A reference CPU handler
//! backed by `ndarray` ships in [`cpu`] and doubles as the template that
//! third-party backends follow.

mod cpu;

pub use cpu::CpuHandler;

use crate::error::{Error, Result};
use ndarray::ArrayD;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Element type of a backend's arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

/// Shared handle to one n-dimensional array
///
/// Clones are shallow: they alias the same buffer. [`TensorHandle::deep_copy`]
/// produces an independent buffer. All reads and writes go through the
/// internal lock, so handles may be shared freely across worker threads.
#[derive(Debug, Clone)]
pub struct TensorHandle {
    data: Arc<RwLock<ArrayD<f32>>>,
    dtype: DType,
}

impl TensorHandle {
    pub fn from_array(array: ArrayD<f32>) -> Self {
        Self {
            data: Arc::new(RwLock::new(array)),
            dtype: DType::F32,
        }
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        let shape = vec![values.len()];
        match ArrayD::from_shape_vec(shape, values) {
            Ok(array) => Self::from_array(array),
            Err(_) => Self::from_array(ArrayD::zeros(vec![0])),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_array(ArrayD::zeros(shape.to_vec()))
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> Vec<usize> {
        self.read().shape().to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Independent copy of the underlying buffer
    pub fn deep_copy(&self) -> Self {
        Self::from_array(self.read().clone())
    }

    /// `true` when both handles alias the same buffer
    pub fn aliases(&self, other: &TensorHandle) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ArrayD<f32>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ArrayD<f32>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Convenience scalar accessor used throughout the tests
    pub fn first(&self) -> f32 {
        self.read().iter().next().copied().unwrap_or(0.0)
    }
}

/// Numeric backend consumed by the execution core
///
/// Implementations must be callable from any worker thread. The session
/// bracket (`begin_session` / `end_session`) is a hint that intermediate
/// buffers may be pooled aggressively for the duration of one iteration;
/// behaviour must be identical with and without sessions.
pub trait ComputationHandler: Send + Sync {
    fn data_type(&self) -> DType;

    /// Allocate a zero-initialised array of the given shape
    fn create(&self, shape: &[usize]) -> TensorHandle;

    /// Copy `src` into `dst` (shapes must match)
    fn fill(&self, src: &TensorHandle, dst: &TensorHandle) -> Result<()>;

    /// Set every element of `dst` to `value`
    fn fill_scalar(&self, value: f32, dst: &TensorHandle);

    /// `out = a + b` elementwise
    fn add(&self, a: &TensorHandle, b: &TensorHandle, out: &TensorHandle) -> Result<()>;

    /// `out = a + scalar`
    fn add_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()>;

    /// `out = a - scalar`
    fn subtract_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()>;

    /// `out = a * scalar`
    fn multiply_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()>;

    /// `out = a / scalar`
    fn divide_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()>;

    /// Total payload size of the given arrays in bytes
    fn size_bytes(&self, arrays: &[&TensorHandle]) -> i64;

    /// Whether arrays created by `other` can be consumed without conversion
    fn is_interchangeable(&self, other: &dyn ComputationHandler) -> bool;

    /// Whether `array` can be converted for use with this handler
    fn can_convert(&self, array: &TensorHandle, other: &dyn ComputationHandler) -> bool;

    /// Convert `array` (created by `other`) for use with this handler
    fn convert(&self, array: &TensorHandle, other: &dyn ComputationHandler)
        -> Result<TensorHandle>;

    /// Open an iteration-scoped buffer pooling session
    fn begin_session(&self) {}

    /// Close the current buffer pooling session
    fn end_session(&self) {}
}

/// Shape guard shared by the arithmetic ops
pub(crate) fn check_same_shape(a: &TensorHandle, b: &TensorHandle) -> Result<()> {
    let (sa, sb) = (a.shape(), b.shape());
    if sa != sb {
        return Err(Error::BackendError(format!(
            "shape mismatch: {sa:?} vs {sb:?}"
        )));
    }
    Ok(())
}
