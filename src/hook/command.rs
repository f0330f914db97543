//! User command injection into the training loop
//!
//! A command is wrapped into a pair of one-shot hooks, one local and one
//! global, sharing a completion counter in a common parameter registry.
//! Every worker runs the local half once and the operator runs the global
//! half once, so the counter crosses `worker_count` exactly when all
//! participants have executed the command. At that point the finish
//! callback is scheduled as a one-shot hook of its own, which keeps user
//! actions inside the training loop instead of racing the workers.

use super::{Hook, HookTarget};
use crate::registry::{Registry, RegistryResolver};
use crate::timestep::{TimeScale, TimeStep};
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

/// Registry key holding the shared completion counter
pub const COMPLETIONS_KEY: &str = "completions";

/// An action injected into the training loop without racing the workers
pub trait Command: Send + Sync {
    /// Executed once on every worker and once globally
    fn invoke(&self, registry: &mut Registry, resolver: &RegistryResolver);

    /// Called after all participants have executed the command
    fn on_finish(&self) {}
}

pub(crate) type FinishScheduler = Box<dyn Fn() + Send + Sync>;

/// One half of an injected command pair
pub(crate) struct CommandHook {
    command: Arc<dyn Command>,
    time_step: TimeStep,
    target: HookTarget,
    params: Arc<Mutex<Registry>>,
    worker_count: usize,
    schedule_finish: Arc<FinishScheduler>,
}

impl CommandHook {
    /// Build the local+global pair for `command`
    pub(crate) fn pair(
        command: Arc<dyn Command>,
        worker_count: usize,
        schedule_finish: FinishScheduler,
    ) -> (CommandHook, CommandHook) {
        let params = Arc::new(Mutex::new(Registry::new()));
        let schedule_finish = Arc::new(schedule_finish);
        let make = |target| CommandHook {
            command: command.clone(),
            time_step: TimeStep::limited(1, TimeScale::Iteration, 1),
            target,
            params: params.clone(),
            worker_count,
            schedule_finish: schedule_finish.clone(),
        };
        (make(HookTarget::Local), make(HookTarget::Global))
    }
}

impl Hook for CommandHook {
    fn time_step(&self) -> &TimeStep {
        &self.time_step
    }

    fn parameter_registry(&self) -> Arc<Mutex<Registry>> {
        self.params.clone()
    }

    fn default_target(&self) -> HookTarget {
        self.target
    }

    fn functionally_equals(&self, other: &dyn Hook) -> bool {
        other
            .as_any()
            .downcast_ref::<CommandHook>()
            .is_some_and(|o| Arc::ptr_eq(&o.command, &self.command) && o.target == self.target)
    }

    fn invoke(&self, registry: &mut Registry, resolver: &RegistryResolver) {
        self.command.invoke(registry, resolver);

        let completions = {
            let mut params = self.params.lock().unwrap_or_else(PoisonError::into_inner);
            let completions = params
                .get(COMPLETIONS_KEY)
                .and_then(|v| v.as_int())
                .unwrap_or(0)
                + 1;
            params.set(COMPLETIONS_KEY, completions);
            completions
        };

        if completions > self.worker_count as i64 {
            log::warn!(
                "command completion count {completions} exceeded worker count {}",
                self.worker_count
            );
            if completions == self.worker_count as i64 + 1 {
                (self.schedule_finish)();
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
