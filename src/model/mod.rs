//! Interfaces consumed by the execution core
//!
//! Networks, optimizers, trainers and data iterators are external
//! collaborators: the core fixes their interfaces and never looks inside.
//! Each exposes its state through a [`Registry`] view, which is how hooks
//! and the merger reach parameters without knowing concrete types.

mod network;

pub use network::ParameterNetwork;

use crate::backend::{ComputationHandler, TensorHandle};
use crate::error::Result;
use crate::registry::{Registry, RegistryValue};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One named batch of input/target arrays produced by a data iterator
#[derive(Debug, Clone, Default)]
pub struct DataBlock {
    tensors: BTreeMap<String, TensorHandle>,
}

impl DataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: TensorHandle) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&TensorHandle> {
        self.tensors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorHandle)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// A trainable network replica
///
/// Parameters must be reachable through the registry view under
/// `layers.<layer>.<parameter>` for the merger's default pattern to find
/// them.
pub trait Network: Send {
    /// Independent replica: mutations to the copy never affect the original
    fn deep_copy(&self) -> Box<dyn Network>;

    /// Registry view of this network's state (parameter handles alias the
    /// live tensors)
    fn registry(&self) -> Registry;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Optimiser state owned per worker
pub trait Optimizer: Send {
    /// Copy sharing hyper-parameters but owning fresh mutable state
    fn shallow_copy(&self) -> Box<dyn Optimizer>;

    fn registry(&self) -> Registry;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Per-epoch lazy finite block stream
///
/// `begin_epoch` rewinds the stream; `next_block` pulls the next block or
/// `None` at epoch end. Workers obtain private replicas via `shallow_copy`.
pub trait DataIterator: Send {
    fn begin_epoch(&mut self);

    fn next_block(
        &mut self,
        handler: &dyn ComputationHandler,
        env: &Environment,
    ) -> Option<DataBlock>;

    fn shallow_copy(&self) -> Box<dyn DataIterator>;

    fn registry(&self) -> Registry;
}

/// The training procedure applied every iteration
///
/// `training_data_iterator` and `optimizer` are factories: each worker
/// calls them once to obtain its private replica.
pub trait Trainer: Send + Sync {
    fn training_data_iterator(&self) -> Box<dyn DataIterator>;

    fn optimizer(&self) -> Box<dyn Optimizer>;

    fn registry(&self) -> Registry;

    /// Feed one block's inputs into the network
    fn provide_external_input_data(&self, network: &mut dyn Network, block: &DataBlock);

    /// One forward/backward/update step
    fn run_training_iteration(
        &self,
        network: &mut dyn Network,
        optimizer: &mut dyn Optimizer,
        registry: &mut Registry,
        handler: &dyn ComputationHandler,
    ) -> Result<()>;

    /// Read one block's outputs back out of the network
    fn provide_external_output_data(&self, network: &mut dyn Network, block: &DataBlock);
}

/// Process-wide shared state holder
///
/// Owns the root registry and the `shared` child registry every event
/// exposes to hooks. Passed by reference into the operator; the core keeps
/// no mutable globals.
#[derive(Debug)]
pub struct Environment {
    registry: Arc<Mutex<Registry>>,
    shared: Arc<Mutex<Registry>>,
}

impl Environment {
    pub fn new() -> Self {
        let shared = Arc::new(Mutex::new(Registry::tagged(["shared"])));
        let mut root = Registry::new();
        root.set("shared", RegistryValue::SharedRegistry(shared.clone()));
        Self {
            registry: Arc::new(Mutex::new(root)),
            shared,
        }
    }

    /// Root registry holding process-wide shared registries
    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        self.registry.clone()
    }

    /// The `shared` child registry (tagged `shared`)
    pub fn shared(&self) -> Arc<Mutex<Registry>> {
        self.shared.clone()
    }

    /// Convenience write into the shared registry
    pub fn set_shared(&self, key: impl Into<String>, value: impl Into<RegistryValue>) {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value);
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
