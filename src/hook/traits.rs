//! The hook protocol
//!
//! A hook is a user-supplied callback bound to a [`TimeStep`]. Hooks are
//! shared as `Arc<dyn Hook>`; the operator tracks attachment, liveness and
//! invocation order, and the only state channel into an invocation is the
//! registry it is handed. A hook must not reach into operator state except
//! through registry reads and writes.

use crate::registry::{Registry, RegistryResolver};
use crate::timestep::TimeStep;
use std::any::Any;
use std::sync::{Arc, Mutex};

/// Where a hook attaches when no explicit choice is made
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HookTarget {
    /// Fires on each worker's thread from worker-local state
    Local,
    /// Fires on operator-driven global events
    Global,
}

/// User-supplied training callback
pub trait Hook: Send + Sync {
    /// Template time step; each owner keeps its own local countdown copy
    fn time_step(&self) -> &TimeStep;

    /// Hooks that must run before this one within the same event
    fn required_hooks(&self) -> Vec<Arc<dyn Hook>> {
        Vec::new()
    }

    /// Smaller priorities run earlier among independent hooks
    fn invoke_priority(&self) -> i32 {
        0
    }

    /// Background hooks run off the worker thread and never gate the next
    /// iteration
    fn invoke_in_background(&self) -> bool {
        false
    }

    /// Registry keys (exact or glob) this hook reads; the union over a
    /// background bucket defines its snapshot
    fn required_registry_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Registry owned by this hook for cross-invocation state
    fn parameter_registry(&self) -> Arc<Mutex<Registry>>;

    fn default_target(&self) -> HookTarget {
        HookTarget::Local
    }

    /// User-defined equivalence used to dedup attachments
    fn functionally_equals(&self, other: &dyn Hook) -> bool;

    /// The callback. Must be bounded or request the background lane.
    fn invoke(&self, registry: &mut Registry, resolver: &RegistryResolver);

    fn as_any(&self) -> &dyn Any;
}

type HookCallback = dyn Fn(&mut Registry, &RegistryResolver) + Send + Sync;

/// Closure-backed hook
///
/// The label doubles as the functional-equality key: two `FnHook`s with
/// the same label and time step template are considered equal, which is
/// what the dedup-on-attach protocol keys on.
pub struct FnHook {
    label: String,
    time_step: TimeStep,
    priority: i32,
    background: bool,
    target: HookTarget,
    required: Vec<Arc<dyn Hook>>,
    required_keys: Vec<String>,
    params: Arc<Mutex<Registry>>,
    callback: Box<HookCallback>,
}

impl FnHook {
    pub fn new(
        label: impl Into<String>,
        time_step: TimeStep,
        callback: impl Fn(&mut Registry, &RegistryResolver) + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            time_step,
            priority: 0,
            background: false,
            target: HookTarget::Local,
            required: Vec::new(),
            required_keys: Vec::new(),
            params: Arc::new(Mutex::new(Registry::new())),
            callback: Box::new(callback),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn targeting(mut self, target: HookTarget) -> Self {
        self.target = target;
        self
    }

    pub fn requires(mut self, hook: Arc<dyn Hook>) -> Self {
        self.required.push(hook);
        self
    }

    pub fn with_required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Hook for FnHook {
    fn time_step(&self) -> &TimeStep {
        &self.time_step
    }

    fn required_hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.required.clone()
    }

    fn invoke_priority(&self) -> i32 {
        self.priority
    }

    fn invoke_in_background(&self) -> bool {
        self.background
    }

    fn required_registry_keys(&self) -> Vec<String> {
        self.required_keys.clone()
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
            .downcast_ref::<FnHook>()
            .is_some_and(|o| o.label == self.label && o.time_step == self.time_step)
    }

    fn invoke(&self, registry: &mut Registry, resolver: &RegistryResolver) {
        (self.callback)(registry, resolver);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for FnHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHook")
            .field("label", &self.label)
            .field("time_step", &self.time_step)
            .field("priority", &self.priority)
            .field("background", &self.background)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestep::TimeScale;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fn_hook_invokes_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let hook = FnHook::new(
            "counter",
            TimeStep::every(1, TimeScale::Iteration),
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut registry = Registry::new();
        let resolver = RegistryResolver::new(Arc::new(Mutex::new(Registry::new())));
        hook.invoke(&mut registry, &resolver);
        hook.invoke(&mut registry, &resolver);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_functional_equality_by_label_and_step() {
        let a = FnHook::new("acc", TimeStep::every(1, TimeScale::Iteration), |_, _| {});
        let b = FnHook::new("acc", TimeStep::every(1, TimeScale::Iteration), |_, _| {});
        let c = FnHook::new("acc", TimeStep::every(2, TimeScale::Iteration), |_, _| {});
        let d = FnHook::new("other", TimeStep::every(1, TimeScale::Iteration), |_, _| {});

        assert!(a.functionally_equals(&b));
        assert!(!a.functionally_equals(&c));
        assert!(!a.functionally_equals(&d));
    }

    #[test]
    fn test_builder_configuration() {
        let base: Arc<dyn Hook> = Arc::new(FnHook::new(
            "base",
            TimeStep::every(1, TimeScale::Iteration),
            |_, _| {},
        ));
        let hook = FnHook::new("top", TimeStep::every(1, TimeScale::Epoch), |_, _| {})
            .with_priority(5)
            .in_background()
            .targeting(HookTarget::Global)
            .requires(base)
            .with_required_keys(["epoch", "layers.*.*"]);

        assert_eq!(hook.invoke_priority(), 5);
        assert!(hook.invoke_in_background());
        assert_eq!(hook.default_target(), HookTarget::Global);
        assert_eq!(hook.required_hooks().len(), 1);
        assert_eq!(hook.required_registry_keys().len(), 2);
    }

    #[test]
    fn test_parameter_registry_persists_across_invocations() {
        let hook = FnHook::new("stateful", TimeStep::every(1, TimeScale::Iteration), |_, _| {});
        hook.parameter_registry().lock().unwrap().set("runs", 1i64);
        let stored = hook.parameter_registry();
        let stored = stored.lock().unwrap();
        assert_eq!(stored.get("runs").unwrap().as_int(), Some(1));
    }
}
