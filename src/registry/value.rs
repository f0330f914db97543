//! Tagged value variants stored in a registry

use super::Registry;
use crate::backend::TensorHandle;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

/// One registry entry
///
/// Scalars are stored by value; tensors and opaque objects are shared
/// handles, so cloning a value never copies a buffer. [`RegistryValue::Any`]
/// is the escape hatch for state the core does not interpret (networks,
/// optimizers, user objects).
#[derive(Clone)]
pub enum RegistryValue {
    Int(i64),
    Float(f64),
    Text(String),
    Flag(bool),
    Tensor(TensorHandle),
    /// Nested child registry, stored by value
    Registry(Box<Registry>),
    /// Nested child registry shared across owners (mutations are visible
    /// to every holder)
    SharedRegistry(Arc<Mutex<Registry>>),
    /// Opaque shared object
    Any(Arc<dyn Any + Send + Sync>),
}

impl RegistryValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RegistryValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            RegistryValue::Float(v) => Some(*v),
            RegistryValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RegistryValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            RegistryValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorHandle> {
        match self {
            RegistryValue::Tensor(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_registry(&self) -> Option<&Registry> {
        match self {
            RegistryValue::Registry(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_shared_registry(&self) -> Option<&Arc<Mutex<Registry>>> {
        match self {
            RegistryValue::SharedRegistry(v) => Some(v),
            _ => None,
        }
    }

    /// Downcast an opaque value
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            RegistryValue::Any(v) => v.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Copy for snapshot registries: tensors get independent buffers,
    /// shared registries are frozen into plain nested registries
    pub(crate) fn snapshot_copy(&self) -> RegistryValue {
        match self {
            RegistryValue::Tensor(t) => RegistryValue::Tensor(t.deep_copy()),
            RegistryValue::Registry(r) => RegistryValue::Registry(Box::new(r.snapshot_all())),
            RegistryValue::SharedRegistry(shared) => {
                let frozen = shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot_all();
                RegistryValue::Registry(Box::new(frozen))
            }
            other => other.clone(),
        }
    }
}

impl std::fmt::Debug for RegistryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryValue::Int(v) => write!(f, "Int({v})"),
            RegistryValue::Float(v) => write!(f, "Float({v})"),
            RegistryValue::Text(v) => write!(f, "Text({v:?})"),
            RegistryValue::Flag(v) => write!(f, "Flag({v})"),
            RegistryValue::Tensor(t) => write!(f, "Tensor(shape={:?})", t.shape()),
            RegistryValue::Registry(r) => write!(f, "Registry({} entries)", r.len()),
            RegistryValue::SharedRegistry(_) => write!(f, "SharedRegistry"),
            RegistryValue::Any(_) => write!(f, "Any"),
        }
    }
}

impl From<i64> for RegistryValue {
    fn from(v: i64) -> Self {
        RegistryValue::Int(v)
    }
}

impl From<f64> for RegistryValue {
    fn from(v: f64) -> Self {
        RegistryValue::Float(v)
    }
}

impl From<&str> for RegistryValue {
    fn from(v: &str) -> Self {
        RegistryValue::Text(v.to_string())
    }
}

impl From<bool> for RegistryValue {
    fn from(v: bool) -> Self {
        RegistryValue::Flag(v)
    }
}

impl From<TensorHandle> for RegistryValue {
    fn from(v: TensorHandle) -> Self {
        RegistryValue::Tensor(v)
    }
}

impl From<Registry> for RegistryValue {
    fn from(v: Registry) -> Self {
        RegistryValue::Registry(Box::new(v))
    }
}
