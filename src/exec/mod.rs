//! Execution core: operator, workers, lifecycle, event dispatch

mod background;
mod events;
mod operator;
mod state;
mod stopwatch;
mod worker;

pub use operator::{Operator, OperatorConfig};
pub use state::ExecutionState;
