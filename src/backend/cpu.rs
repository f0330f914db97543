//! Reference CPU handler backed by `ndarray`

use super::{check_same_shape, ComputationHandler, DType, TensorHandle};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-threaded dense CPU backend
///
/// Sessions are counted but otherwise free: the dense backend allocates per
/// call, so pooling is a no-op. The counters let tests assert the session
/// bracket is honoured.
#[derive(Debug, Default)]
pub struct CpuHandler {
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
}

impl CpuHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }
}

impl ComputationHandler for CpuHandler {
    fn data_type(&self) -> DType {
        DType::F32
    }

    fn create(&self, shape: &[usize]) -> TensorHandle {
        TensorHandle::zeros(shape)
    }

    fn fill(&self, src: &TensorHandle, dst: &TensorHandle) -> Result<()> {
        check_same_shape(src, dst)?;
        if src.aliases(dst) {
            return Ok(());
        }
        dst.write().assign(&src.read());
        Ok(())
    }

    fn fill_scalar(&self, value: f32, dst: &TensorHandle) {
        dst.write().fill(value);
    }

    fn add(&self, a: &TensorHandle, b: &TensorHandle, out: &TensorHandle) -> Result<()> {
        check_same_shape(a, b)?;
        check_same_shape(a, out)?;
        let sum = &*a.read() + &*b.read();
        out.write().assign(&sum);
        Ok(())
    }

    fn add_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()> {
        check_same_shape(a, out)?;
        let result = &*a.read() + scalar;
        out.write().assign(&result);
        Ok(())
    }

    fn subtract_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()> {
        check_same_shape(a, out)?;
        let result = &*a.read() - scalar;
        out.write().assign(&result);
        Ok(())
    }

    fn multiply_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()> {
        check_same_shape(a, out)?;
        let result = &*a.read() * scalar;
        out.write().assign(&result);
        Ok(())
    }

    fn divide_scalar(&self, a: &TensorHandle, scalar: f32, out: &TensorHandle) -> Result<()> {
        if scalar == 0.0 {
            return Err(Error::BackendError("division by zero".to_string()));
        }
        check_same_shape(a, out)?;
        let result = &*a.read() / scalar;
        out.write().assign(&result);
        Ok(())
    }

    fn size_bytes(&self, arrays: &[&TensorHandle]) -> i64 {
        arrays
            .iter()
            .map(|a| (a.len() * a.dtype().size_bytes()) as i64)
            .sum()
    }

    fn is_interchangeable(&self, other: &dyn ComputationHandler) -> bool {
        self.data_type() == other.data_type()
    }

    fn can_convert(&self, _array: &TensorHandle, other: &dyn ComputationHandler) -> bool {
        // Every dense f32/f64 array is representable here
        matches!(other.data_type(), DType::F32 | DType::F64)
    }

    fn convert(
        &self,
        array: &TensorHandle,
        other: &dyn ComputationHandler,
    ) -> Result<TensorHandle> {
        if !self.can_convert(array, other) {
            return Err(Error::BackendError(format!(
                "cannot convert from {:?}",
                other.data_type()
            )));
        }
        Ok(array.deep_copy())
    }

    fn begin_session(&self) {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
    }

    fn end_session(&self) {
        self.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}
