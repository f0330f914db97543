//! dirigir — parallel training execution core
//!
//! This crate drives one or more parallel workers through the
//! iteration/epoch cycle of a training run, merges their per-worker
//! network replicas back into a shared global model, and fires ordered,
//! dependency-aware hooks at well-defined points in that cycle:
//!
//! - [`Operator`] — owns the global network and the worker fleet,
//!   orchestrates pull/merge/push of replicas, and exposes the
//!   cooperative lifecycle (`start` / `pause` / `resume` / `stop` /
//!   `start_once` / `reset`)
//! - Workers — one thread per worker, each with a private network
//!   replica, optimiser state and data iterator replica
//! - [`Hook`] — user callbacks bound to a [`TimeStep`], with required-hook
//!   dependencies, invocation priorities and a background lane
//! - [`Registry`] / [`RegistryResolver`] — the hierarchical tagged mapping
//!   that is the only data channel into hooks
//! - [`NetworkMerger`] — reduction of N worker replicas into the global
//!   network at epoch boundaries (default: parameter-wise mean)
//!
//! The numeric backend, network architecture, optimiser and data iterator
//! are consumed through the traits in [`backend`] and [`model`]; concrete
//! implementations live outside this crate (a CPU reference backend ships
//! in-crate for tests and as a template).
//!
//! # Example
//!
//! ```ignore
//! use dirigir::{Environment, FnHook, Operator, OperatorConfig, TimeScale, TimeStep};
//! use std::sync::Arc;
//!
//! let operator = Operator::new(
//!     OperatorConfig::new(4),
//!     Arc::new(my_backend),
//!     Arc::new(my_trainer),
//!     Box::new(my_network),
//!     Arc::new(Environment::new()),
//! )?;
//!
//! operator.attach_global_hook(Arc::new(FnHook::new(
//!     "epoch-report",
//!     TimeStep::every(1, TimeScale::Epoch),
//!     |registry, _| println!("epoch {:?}", registry.get("epoch")),
//! )))?;
//!
//! operator.start()?;
//! ```

pub mod backend;
pub mod error;
pub mod exec;
pub mod hook;
pub mod merge;
pub mod model;
pub mod registry;
pub mod timestep;

pub use backend::{ComputationHandler, CpuHandler, DType, TensorHandle};
pub use error::{Error, Result};
pub use exec::{ExecutionState, Operator, OperatorConfig};
pub use hook::{Command, FnHook, Hook, HookTarget};
pub use merge::{AverageMerger, NetworkMerger, DEFAULT_MERGE_PATTERN};
pub use model::{
    DataBlock, DataIterator, Environment, Network, Optimizer, ParameterNetwork, Trainer,
};
pub use registry::{Registry, RegistryResolver, RegistryValue};
pub use timestep::{TimeScale, TimeStep, LIVE_TIME_UNBOUNDED};
