//! Time-scale event ejection and hook dispatch
//!
//! Shared by the worker-local path (fired on each worker's thread) and the
//! operator-global path (fired from control threads and `push_progress`).
//! Both work against an immutable [`HookPlan`] snapshot, so attach/detach
//! rebuilds never race an in-flight event.

use super::background::BackgroundInvoker;
use crate::hook::Hook;
use crate::registry::{Registry, RegistryResolver, RegistryValue};
use crate::timestep::{TimeScale, TimeStep};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// One attached hook placed into the invocation order
#[derive(Clone)]
pub(crate) struct PlanEntry {
    pub id: u32,
    pub hook: Arc<dyn Hook>,
    pub scale: TimeScale,
    /// Total-order position from the planner
    pub index: u32,
    /// 0 = foreground, otherwise background bucket id
    pub target: u32,
}

/// Immutable invocation plan; entries sorted by index
#[derive(Default)]
pub(crate) struct HookPlan {
    pub entries: Vec<PlanEntry>,
}

impl HookPlan {
    pub fn of_scale(&self, scale: TimeScale) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(move |e| e.scale == scale)
    }
}

/// A hook whose local time step elapsed for this event
pub(crate) struct FiredHook {
    pub entry: PlanEntry,
    /// Local live time reached zero on this fire
    pub now_dead: bool,
}

/// Tick the local countdowns for `scale` and collect the hooks that fire
///
/// Missing local copies are created lazily from each hook's template. The
/// result preserves plan order, which is invocation-index order.
pub(crate) fn eject_scale_events(
    scale: TimeScale,
    plan: &HookPlan,
    timesteps: &mut HashMap<u32, TimeStep>,
) -> Vec<FiredHook> {
    let mut fired = Vec::new();
    for entry in plan.of_scale(scale) {
        let step = timesteps
            .entry(entry.id)
            .or_insert_with(|| entry.hook.time_step().deep_copy());
        if step.tick() {
            fired.push(FiredHook {
                entry: entry.clone(),
                now_dead: step.is_dead(),
            });
        }
    }
    fired
}

/// Split fired hooks into the foreground lane (in index order) and
/// background buckets keyed by bucket id
pub(crate) fn split_lanes(
    fired: &[FiredHook],
) -> (Vec<&FiredHook>, BTreeMap<u32, Vec<&FiredHook>>) {
    let mut foreground = Vec::new();
    let mut buckets: BTreeMap<u32, Vec<&FiredHook>> = BTreeMap::new();
    for hook in fired {
        if hook.entry.target == 0 {
            foreground.push(hook);
        } else {
            buckets.entry(hook.entry.target).or_default().push(hook);
        }
    }
    (foreground, buckets)
}

/// Invoke one hook, isolating its failure from the rest of the event
pub(crate) fn invoke_isolated(
    hook: &Arc<dyn Hook>,
    registry: &mut Registry,
    resolver: &RegistryResolver,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| hook.invoke(registry, resolver)));
    if outcome.is_err() {
        log::warn!("hook failed; remaining hooks of this event still run");
    }
}

/// Dispatch each background bucket as one pool job with a snapshot registry
///
/// The snapshot covers only the union of the bucket's required registry
/// keys (direct and glob-expanded), copied at dispatch time, so background
/// hooks never contend with foreground updates.
pub(crate) fn dispatch_background(
    pool: &BackgroundInvoker,
    buckets: BTreeMap<u32, Vec<&FiredHook>>,
    buffer: &Registry,
    resolver_root: Arc<Mutex<Registry>>,
) {
    for bucket in buckets.into_values() {
        let mut keys: Vec<String> = bucket
            .iter()
            .flat_map(|f| f.entry.hook.required_registry_keys())
            .collect();
        keys.sort();
        keys.dedup();
        let mut snapshot = buffer.snapshot_keys(keys.iter().map(String::as_str));
        // Background hooks still see the shared registry handle
        if let Some(shared) = buffer.get("shared") {
            if matches!(shared, RegistryValue::SharedRegistry(_)) {
                snapshot.set("shared", shared);
            }
        }

        let hooks: Vec<Arc<dyn Hook>> = bucket.iter().map(|f| f.entry.hook.clone()).collect();
        let root = resolver_root.clone();
        pool.dispatch(Box::new(move || {
            let resolver = RegistryResolver::new(root);
            let mut snapshot = snapshot;
            for hook in &hooks {
                invoke_isolated(hook, &mut snapshot, &resolver);
            }
        }));
    }
}
