//! Operator: global network, worker fleet, hook arena, lifecycle
//!
//! The operator owns everything the workers share: the global network,
//! the attached hook set with its invocation plans, the epoch/iteration
//! progress ledgers and the lifecycle state machine. Control calls
//! (`start`, `signal_pause`, ...) validate and flip the state
//! synchronously, then hand propagation to a dedicated lock-serialised
//! control thread so they return immediately.

use super::background::BackgroundInvoker;
use super::events::{
    dispatch_background, eject_scale_events, invoke_isolated, split_lanes, HookPlan, PlanEntry,
};
use super::state::ExecutionState;
use super::stopwatch::Stopwatch;
use super::worker::{self, WorkerHandle, WorkerShared};
use crate::backend::ComputationHandler;
use crate::error::{Error, Result};
use crate::hook::{
    plan_invocations, Command, CommandHook, FinishScheduler, FnHook, Hook, HookTarget, PlannedSlot,
    PlannerHook,
};
use crate::merge::{AverageMerger, NetworkMerger};
use crate::model::{Environment, Network, Trainer};
use crate::registry::{Registry, RegistryResolver, RegistryValue};
use crate::timestep::{TimeScale, TimeStep};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Operator construction parameters
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Number of parallel workers (>= 1)
    pub worker_count: usize,
    /// Bracket each iteration with backend sessions
    pub use_sessions: bool,
    /// Advisory scheduling priority recorded for worker threads
    pub thread_priority: Option<i32>,
    /// Threads in the background hook pool
    pub background_pool_size: usize,
}

impl OperatorConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            use_sessions: false,
            thread_priority: None,
            background_pool_size: 2,
        }
    }

    pub fn with_sessions(mut self) -> Self {
        self.use_sessions = true;
        self
    }

    pub fn with_thread_priority(mut self, priority: i32) -> Self {
        self.thread_priority = Some(priority);
        self
    }

    pub fn with_background_pool_size(mut self, size: usize) -> Self {
        self.background_pool_size = size.max(1);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::InvalidConfiguration(
                "worker_count must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One hook held in the arena
struct AttachedHook {
    id: u32,
    hook: Arc<dyn Hook>,
    /// Per-worker liveness (length 1 for globally scoped hooks)
    alive: Vec<bool>,
    used_required: Vec<u32>,
    dependents: HashSet<u32>,
    user_attached: bool,
    insertion: u32,
}

#[derive(Default)]
struct HookTable {
    hooks: HashMap<u32, AttachedHook>,
    /// Attach order, for deterministic planning
    order: Vec<u32>,
}

impl HookTable {
    fn find_equal(&self, hook: &dyn Hook) -> Option<u32> {
        self.order.iter().copied().find(|id| {
            self.hooks
                .get(id)
                .is_some_and(|attached| attached.hook.functionally_equals(hook))
        })
    }
}

#[derive(Default)]
struct HookRegistry {
    local: HookTable,
    global: HookTable,
    next_id: u32,
    next_insertion: u32,
}

struct GlobalProgress {
    epoch_number: usize,
    highest_iteration: usize,
}

struct IterationLedger {
    /// epoch -> per-worker last pushed iteration
    by_epoch: HashMap<usize, Vec<Option<usize>>>,
    /// Per-worker epoch of the most recent push
    latest_epoch: Vec<usize>,
}

impl IterationLedger {
    fn new(worker_count: usize) -> Self {
        Self {
            by_epoch: HashMap::new(),
            latest_epoch: vec![0; worker_count],
        }
    }
}

pub(crate) struct OperatorInner {
    pub(crate) config: OperatorConfig,
    use_sessions: AtomicBool,
    pub(crate) handler: Arc<dyn ComputationHandler>,
    pub(crate) trainer: Arc<dyn Trainer>,
    pub(crate) env: Arc<Environment>,
    merger: Mutex<Box<dyn NetworkMerger>>,
    /// The network-changed lock: merger writes, pull deep-copies read
    global_network: Mutex<Box<dyn Network>>,
    progress: Mutex<GlobalProgress>,
    pushed_networks: Mutex<HashMap<usize, Vec<Option<Box<dyn Network>>>>>,
    pushed_iterations: Mutex<IterationLedger>,
    hooks: Mutex<HookRegistry>,
    local_plan: Mutex<Arc<HookPlan>>,
    global_plan: Mutex<Arc<HookPlan>>,
    global_timesteps: Mutex<HashMap<u32, TimeStep>>,
    state: Mutex<ExecutionState>,
    state_changed: Condvar,
    /// Serialises lifecycle propagation tasks
    lifecycle: Mutex<()>,
    stopwatch: Mutex<Stopwatch>,
    pub(crate) background: BackgroundInvoker,
    workers: Mutex<Vec<WorkerHandle>>,
    /// Registry views shown on global events (there is no global optimiser
    /// or iterator instance; these are reference replicas' views)
    global_optimizer_registry: Registry,
    global_iterator_registry: Registry,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OperatorInner {
    pub(crate) fn state(&self) -> ExecutionState {
        *lock(&self.state)
    }

    pub(crate) fn use_sessions(&self) -> bool {
        self.use_sessions.load(Ordering::SeqCst)
    }

    pub(crate) fn runtime_millis(&self) -> u64 {
        lock(&self.stopwatch).elapsed_millis()
    }

    pub(crate) fn local_plan_snapshot(&self) -> Arc<HookPlan> {
        lock(&self.local_plan).clone()
    }

    fn global_plan_snapshot(&self) -> Arc<HookPlan> {
        lock(&self.global_plan).clone()
    }

    fn epoch_number(&self) -> usize {
        lock(&self.progress).epoch_number
    }

    /// Validate and apply a lifecycle transition; manages the stopwatch
    fn transition(&self, to: ExecutionState) -> Result<ExecutionState> {
        let mut state = lock(&self.state);
        let from = *state;
        if !from.can_transition_to(to) {
            log::warn!("operator: invalid lifecycle transition: {from} -> {to}");
            return Err(Error::InvalidLifecycleTransition { from, to });
        }
        *state = to;
        let mut watch = lock(&self.stopwatch);
        match to {
            ExecutionState::Running => watch.start(),
            ExecutionState::Paused | ExecutionState::Stopped => watch.stop(),
            ExecutionState::None => watch.reset(),
        }
        self.state_changed.notify_all();
        Ok(from)
    }

    fn worker_shareds(&self) -> Vec<Arc<WorkerShared>> {
        lock(&self.workers)
            .iter()
            .map(|w| w.shared.clone())
            .collect()
    }

    fn wait_workers_halted(&self) {
        for shared in self.worker_shareds() {
            shared.wait_until_halted();
        }
    }

    fn join_workers(&self) {
        for handle in lock(&self.workers).iter_mut() {
            handle.join();
        }
    }

    fn shutdown(&self) {
        for shared in self.worker_shareds() {
            shared.force_stop();
        }
        self.join_workers();
    }

    fn reset_progress(&self) {
        {
            let mut progress = lock(&self.progress);
            progress.epoch_number = 0;
            progress.highest_iteration = 0;
        }
        lock(&self.pushed_networks).clear();
        *lock(&self.pushed_iterations) = IterationLedger::new(self.config.worker_count);
        lock(&self.global_timesteps).clear();
    }

    // ---- replica synchronisation -------------------------------------

    /// Refresh a worker's replica from the global network when it enters a
    /// new epoch (only meaningful with more than one worker) or has no
    /// replica yet
    pub(crate) fn pull_progress(
        &self,
        network: &mut Option<Box<dyn Network>>,
        iteration: usize,
    ) {
        let refresh = network.is_none() || (iteration == 0 && self.config.worker_count > 1);
        if refresh {
            let global = lock(&self.global_network);
            *network = Some(global.deep_copy());
        }
    }

    /// Record one completed worker iteration; merge replicas and fire
    /// global events at epoch and alignment boundaries
    pub(crate) fn push_progress(
        &self,
        index: usize,
        epoch: usize,
        iteration: usize,
        network: Option<&dyn Network>,
    ) -> Result<()> {
        let worker_count = self.config.worker_count;

        let crossed_boundary = epoch > self.epoch_number() && iteration == 1;
        if crossed_boundary {
            let network = network.ok_or_else(|| {
                Error::InvalidConfiguration(
                    "worker pushed an epoch boundary without a network replica".to_string(),
                )
            })?;
            let completed = {
                let mut pushed = lock(&self.pushed_networks);
                let slots = pushed.entry(epoch).or_insert_with(|| {
                    let mut slots: Vec<Option<Box<dyn Network>>> = Vec::new();
                    slots.resize_with(worker_count, || None);
                    slots
                });
                let slot = slots.get_mut(index).ok_or(Error::MergerMismatch {
                    epoch,
                    capacity: worker_count,
                })?;
                if slot.is_some() {
                    return Err(Error::MergerMismatch {
                        epoch,
                        capacity: worker_count,
                    });
                }
                *slot = Some(network.deep_copy());
                if slots.iter().all(|slot| slot.is_some()) {
                    pushed.remove(&epoch)
                } else {
                    None
                }
            };
            if let Some(slots) = completed {
                let replicas: Vec<Box<dyn Network>> = slots.into_iter().flatten().collect();
                lock(&self.progress).epoch_number = epoch;
                {
                    let mut global = lock(&self.global_network);
                    let merger = lock(&self.merger);
                    merger.merge(global.as_mut(), &replicas, self.handler.as_ref())?;
                }
                // Replica copies released here
                self.fire_global_scale(TimeScale::Epoch);
            }
        }

        let aligned = {
            let mut ledger = lock(&self.pushed_iterations);
            if let Some(slot) = ledger.latest_epoch.get_mut(index) {
                *slot = epoch;
            }
            let slots = ledger
                .by_epoch
                .entry(epoch)
                .or_insert_with(|| vec![None; worker_count]);
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(iteration);
            }

            let current = self.epoch_number();
            ledger.by_epoch.retain(|recorded, _| *recorded >= current);
            if ledger.latest_epoch.iter().all(|e| *e == current) {
                ledger.by_epoch.get(&current).and_then(|slots| {
                    let first = slots.first().copied().flatten()?;
                    slots
                        .iter()
                        .all(|slot| *slot == Some(first))
                        .then_some(first)
                })
            } else {
                None
            }
        };
        if let Some(iteration) = aligned {
            lock(&self.progress).highest_iteration = iteration;
            self.fire_global_scale(TimeScale::Iteration);
        }
        Ok(())
    }

    // ---- hook arena ---------------------------------------------------

    pub(crate) fn attach(&self, hook: Arc<dyn Hook>, scope: HookTarget) -> Result<bool> {
        validate_no_cycle(&hook)?;
        let mut registry = lock(&self.hooks);
        let HookRegistry {
            ref mut local,
            ref mut global,
            ref mut next_id,
            ref mut next_insertion,
        } = *registry;
        let (table, alive_slots) = match scope {
            HookTarget::Local => (local, self.config.worker_count),
            HookTarget::Global => (global, 1),
        };
        if table.find_equal(hook.as_ref()).is_some() {
            return Ok(false);
        }
        attach_into(table, next_id, next_insertion, hook, alive_slots, true);
        self.rebuild_plans(&registry)?;
        Ok(true)
    }

    pub(crate) fn detach(&self, hook: &dyn Hook, scope: HookTarget) -> Result<bool> {
        let mut registry = lock(&self.hooks);
        let table = match scope {
            HookTarget::Local => &mut registry.local,
            HookTarget::Global => &mut registry.global,
        };
        let Some(id) = table.find_equal(hook) else {
            return Ok(false);
        };
        let dependents = table
            .hooks
            .get(&id)
            .map(|h| h.dependents.len())
            .unwrap_or(0);
        if dependents > 0 {
            return Err(Error::DependencyViolation(format!(
                "hook still has {dependents} dependent hook(s)"
            )));
        }
        detach_cascading(table, id);
        self.rebuild_plans(&registry)?;
        Ok(true)
    }

    pub(crate) fn attached_count(&self, scope: HookTarget) -> usize {
        let registry = lock(&self.hooks);
        match scope {
            HookTarget::Local => registry.local.hooks.len(),
            HookTarget::Global => registry.global.hooks.len(),
        }
    }

    /// Local liveness bookkeeping: a hook whose live time ran out on every
    /// worker is detached automatically
    pub(crate) fn mark_local_hook_dead(&self, id: u32, worker_index: usize) {
        let mut registry = lock(&self.hooks);
        let all_dead = {
            let Some(hook) = registry.local.hooks.get_mut(&id) else {
                return;
            };
            if let Some(flag) = hook.alive.get_mut(worker_index) {
                *flag = false;
            }
            hook.alive.iter().all(|alive| !alive)
        };
        if all_dead {
            force_detach(&mut registry.local, id);
            if let Err(error) = self.rebuild_plans(&registry) {
                log::error!("plan rebuild after dead-hook collection failed: {error}");
            }
        }
    }

    fn collect_dead_global(&self, ids: &[u32]) {
        if ids.is_empty() {
            return;
        }
        let mut registry = lock(&self.hooks);
        for id in ids {
            force_detach(&mut registry.global, *id);
        }
        if let Err(error) = self.rebuild_plans(&registry) {
            log::error!("plan rebuild after dead-hook collection failed: {error}");
        }
    }

    fn rebuild_plans(&self, registry: &HookRegistry) -> Result<()> {
        let local = build_plan(&registry.local)?;
        let global = build_plan(&registry.global)?;
        *lock(&self.local_plan) = Arc::new(local);
        *lock(&self.global_plan) = Arc::new(global);
        Ok(())
    }

    // ---- global events ------------------------------------------------

    /// Fire the globally scoped hooks of one time scale
    pub(crate) fn fire_global_scale(&self, scale: TimeScale) {
        let plan = self.global_plan_snapshot();
        let fired = {
            let mut timesteps = lock(&self.global_timesteps);
            eject_scale_events(scale, &plan, &mut timesteps)
        };
        if fired.is_empty() {
            return;
        }

        let mut buffer = self.build_global_buffer();
        let resolver = RegistryResolver::new(self.env.registry());
        let (foreground, buckets) = split_lanes(&fired);
        for hook in foreground {
            invoke_isolated(&hook.entry.hook, &mut buffer, &resolver);
        }
        dispatch_background(&self.background, buckets, &buffer, self.env.registry());

        // Globally scoped hooks die directly on live-time exhaustion
        let dead: Vec<u32> = fired
            .iter()
            .filter(|f| f.now_dead)
            .map(|f| f.entry.id)
            .collect();
        self.collect_dead_global(&dead);
    }

    fn build_global_buffer(&self) -> Registry {
        let mut buffer = Registry::new();
        {
            let network = lock(&self.global_network);
            buffer.set("network", network.registry());
        }
        buffer.set("optimizer", self.global_optimizer_registry.clone());
        buffer.set("iterator", self.global_iterator_registry.clone());
        buffer.set("trainer", self.trainer.registry());
        {
            let progress = lock(&self.progress);
            buffer.set("epoch", progress.epoch_number as i64);
            buffer.set("iteration", progress.highest_iteration as i64);
        }
        buffer.set("runtime_millis", self.runtime_millis() as i64);
        buffer.set("shared", RegistryValue::SharedRegistry(self.env.shared()));
        buffer
    }
}

/// Run a propagation task on a dedicated lock-serialised control thread
fn spawn_control(
    inner: &Arc<OperatorInner>,
    name: &str,
    task: impl FnOnce(&Arc<OperatorInner>) + Send + 'static,
) {
    type ControlTask = Box<dyn FnOnce(&Arc<OperatorInner>) + Send>;
    let cell: Arc<Mutex<Option<ControlTask>>> = Arc::new(Mutex::new(Some(Box::new(task))));
    let spawned = {
        let cell = cell.clone();
        let inner = inner.clone();
        std::thread::Builder::new()
            .name(format!("dirigir-control-{name}"))
            .spawn(move || {
                if let Some(task) = lock(&cell).take() {
                    let _guard = lock(&inner.lifecycle);
                    task(&inner);
                }
            })
    };
    if let Err(e) = spawned {
        log::warn!("control thread spawn failed ({e}); running inline");
        if let Some(task) = lock(&cell).take() {
            let _guard = lock(&inner.lifecycle);
            task(inner);
        }
    }
}

fn spawn_workers(inner: &Arc<OperatorInner>, budget: Option<u64>) {
    let mut workers = lock(&inner.workers);
    if !workers.is_empty() {
        return;
    }
    if let Some(priority) = inner.config.thread_priority {
        log::debug!("worker thread priority {priority} is advisory on this runtime");
    }
    for index in 0..inner.config.worker_count {
        workers.push(worker::spawn(inner.clone(), index, budget));
    }
}

/// Depth-first attach honouring the dedup protocol: functionally equal
/// hooks resolve to the already-attached instance, which records the new
/// hook among its dependents
fn attach_into(
    table: &mut HookTable,
    next_id: &mut u32,
    next_insertion: &mut u32,
    hook: Arc<dyn Hook>,
    alive_slots: usize,
    user_attached: bool,
) -> u32 {
    if let Some(existing) = table.find_equal(hook.as_ref()) {
        if user_attached {
            if let Some(attached) = table.hooks.get_mut(&existing) {
                attached.user_attached = true;
            }
        }
        return existing;
    }

    let used_required: Vec<u32> = hook
        .required_hooks()
        .into_iter()
        .map(|required| attach_into(table, next_id, next_insertion, required, alive_slots, false))
        .collect();

    let id = *next_id;
    *next_id += 1;
    let insertion = *next_insertion;
    *next_insertion += 1;

    for required in &used_required {
        if let Some(attached) = table.hooks.get_mut(required) {
            attached.dependents.insert(id);
        }
    }
    table.hooks.insert(
        id,
        AttachedHook {
            id,
            hook,
            alive: vec![true; alive_slots],
            used_required,
            dependents: HashSet::new(),
            user_attached,
            insertion,
        },
    );
    table.order.push(id);
    id
}

/// Remove a hook and any required hooks it orphans (required hooks that
/// were only attached as dependencies and have no dependents left)
fn detach_cascading(table: &mut HookTable, id: u32) {
    let Some(removed) = table.hooks.remove(&id) else {
        return;
    };
    table.order.retain(|other| *other != id);
    for required in removed.used_required {
        let orphaned = if let Some(attached) = table.hooks.get_mut(&required) {
            attached.dependents.remove(&id);
            attached.dependents.is_empty() && !attached.user_attached
        } else {
            false
        };
        if orphaned {
            detach_cascading(table, required);
        }
    }
}

/// Dead-hook removal: sever dangling dependent edges first, then cascade
fn force_detach(table: &mut HookTable, id: u32) {
    let dependents: Vec<u32> = table
        .hooks
        .get(&id)
        .map(|h| h.dependents.iter().copied().collect())
        .unwrap_or_default();
    for dependent in dependents {
        if let Some(attached) = table.hooks.get_mut(&dependent) {
            attached.used_required.retain(|required| *required != id);
        }
        if let Some(attached) = table.hooks.get_mut(&id) {
            attached.dependents.remove(&dependent);
        }
    }
    detach_cascading(table, id);
}

fn build_plan(table: &HookTable) -> Result<HookPlan> {
    let inputs: Vec<PlannerHook> = table
        .order
        .iter()
        .filter_map(|id| table.hooks.get(id))
        .map(|attached| PlannerHook {
            id: attached.id,
            priority: attached.hook.invoke_priority(),
            background: attached.hook.invoke_in_background(),
            insertion: attached.insertion,
            required: attached.used_required.clone(),
        })
        .collect();
    let slots = plan_invocations(&inputs)?;

    let mut entries: Vec<PlanEntry> = table
        .order
        .iter()
        .filter_map(|id| table.hooks.get(id))
        .map(|attached| {
            let slot = slots
                .get(&attached.id)
                .copied()
                .unwrap_or(PlannedSlot { index: 0, target: 0 });
            PlanEntry {
                id: attached.id,
                hook: attached.hook.clone(),
                scale: attached.hook.time_step().scale(),
                index: slot.index,
                target: slot.target,
            }
        })
        .collect();
    entries.sort_by_key(|entry| entry.index);
    Ok(HookPlan { entries })
}

/// Reject required-hook graphs containing a cycle before touching the arena
fn validate_no_cycle(hook: &Arc<dyn Hook>) -> Result<()> {
    fn visit(hook: &Arc<dyn Hook>, path: &mut Vec<*const ()>) -> Result<()> {
        let ptr = Arc::as_ptr(hook) as *const ();
        if path.contains(&ptr) {
            return Err(Error::DependencyViolation(
                "required-hook set contains a cycle".to_string(),
            ));
        }
        path.push(ptr);
        for required in hook.required_hooks() {
            visit(&required, path)?;
        }
        path.pop();
        Ok(())
    }
    visit(hook, &mut Vec::new())
}

/// Orchestrates workers, replica merging and hooks for one training run
pub struct Operator {
    inner: Arc<OperatorInner>,
}

impl Operator {
    pub fn new(
        config: OperatorConfig,
        handler: Arc<dyn ComputationHandler>,
        trainer: Arc<dyn Trainer>,
        network: Box<dyn Network>,
        env: Arc<Environment>,
    ) -> Result<Self> {
        config.validate()?;
        let global_optimizer_registry = trainer.optimizer().registry();
        let global_iterator_registry = trainer.training_data_iterator().registry();
        let worker_count = config.worker_count;
        let background_pool_size = config.background_pool_size;
        let use_sessions = config.use_sessions;
        Ok(Self {
            inner: Arc::new(OperatorInner {
                config,
                use_sessions: AtomicBool::new(use_sessions),
                handler,
                trainer,
                env,
                merger: Mutex::new(Box::new(AverageMerger::new())),
                global_network: Mutex::new(network),
                progress: Mutex::new(GlobalProgress {
                    epoch_number: 0,
                    highest_iteration: 0,
                }),
                pushed_networks: Mutex::new(HashMap::new()),
                pushed_iterations: Mutex::new(IterationLedger::new(worker_count)),
                hooks: Mutex::new(HookRegistry::default()),
                local_plan: Mutex::new(Arc::new(HookPlan::default())),
                global_plan: Mutex::new(Arc::new(HookPlan::default())),
                global_timesteps: Mutex::new(HashMap::new()),
                state: Mutex::new(ExecutionState::None),
                state_changed: Condvar::new(),
                lifecycle: Mutex::new(()),
                stopwatch: Mutex::new(Stopwatch::new()),
                background: BackgroundInvoker::new(background_pool_size),
                workers: Mutex::new(Vec::new()),
                global_optimizer_registry,
                global_iterator_registry,
            }),
        })
    }

    // ---- lifecycle ----------------------------------------------------

    /// Spawn the workers and run freely until paused or stopped
    pub fn start(&self) -> Result<()> {
        let state = self.inner.state();
        if state != ExecutionState::None {
            log::warn!("operator: invalid lifecycle transition: start from {state}");
            return Err(Error::InvalidLifecycleTransition {
                from: state,
                to: ExecutionState::Running,
            });
        }
        self.inner.transition(ExecutionState::Running)?;
        spawn_control(&self.inner, "start", |inner| {
            spawn_workers(inner, None);
            inner.fire_global_scale(TimeScale::Start);
        });
        Ok(())
    }

    /// Run exactly one iteration on every worker, ending Paused
    ///
    /// From the initial state this also performs worker initialisation;
    /// from Paused it steps the existing workers once.
    pub fn start_once(&self) -> Result<()> {
        match self.inner.state() {
            ExecutionState::None => {
                self.inner.transition(ExecutionState::Running)?;
                spawn_control(&self.inner, "start-once", |inner| {
                    spawn_workers(inner, Some(1));
                    inner.fire_global_scale(TimeScale::Start);
                    inner.wait_workers_halted();
                    let _ = inner.transition(ExecutionState::Paused);
                    inner.fire_global_scale(TimeScale::Pause);
                });
                Ok(())
            }
            ExecutionState::Paused => {
                self.inner.transition(ExecutionState::Running)?;
                spawn_control(&self.inner, "step-once", |inner| {
                    inner.fire_global_scale(TimeScale::Resume);
                    for shared in inner.worker_shareds() {
                        let _ = shared.begin_step_burst(1);
                    }
                    inner.wait_workers_halted();
                    let _ = inner.transition(ExecutionState::Paused);
                    inner.fire_global_scale(TimeScale::Pause);
                });
                Ok(())
            }
            from => {
                log::warn!("operator: invalid lifecycle transition: start_once from {from}");
                Err(Error::InvalidLifecycleTransition {
                    from,
                    to: ExecutionState::Running,
                })
            }
        }
    }

    pub fn signal_pause(&self) -> Result<()> {
        self.inner.transition(ExecutionState::Paused)?;
        spawn_control(&self.inner, "pause", |inner| {
            for shared in inner.worker_shareds() {
                if shared.state() == ExecutionState::Running {
                    let _ = shared.signal(ExecutionState::Paused);
                }
            }
            inner.wait_workers_halted();
            inner.fire_global_scale(TimeScale::Pause);
        });
        Ok(())
    }

    pub fn signal_resume(&self) -> Result<()> {
        self.inner.transition(ExecutionState::Running)?;
        spawn_control(&self.inner, "resume", |inner| {
            inner.fire_global_scale(TimeScale::Resume);
            for shared in inner.worker_shareds() {
                if shared.state() == ExecutionState::Paused {
                    let _ = shared.signal(ExecutionState::Running);
                }
            }
        });
        Ok(())
    }

    pub fn signal_stop(&self) -> Result<()> {
        self.inner.transition(ExecutionState::Stopped)?;
        spawn_control(&self.inner, "stop", |inner| {
            for shared in inner.worker_shareds() {
                shared.force_stop();
            }
            inner.join_workers();
            inner.fire_global_scale(TimeScale::Stop);
        });
        Ok(())
    }

    /// Tear the workers down and return to the initial state
    pub fn signal_reset(&self) -> Result<()> {
        self.inner.transition(ExecutionState::None)?;
        spawn_control(&self.inner, "reset", |inner| {
            for shared in inner.worker_shareds() {
                shared.force_stop();
            }
            inner.join_workers();
            lock(&inner.workers).clear();
            inner.reset_progress();
            inner.fire_global_scale(TimeScale::Reset);
        });
        Ok(())
    }

    /// Block until the state differs from its value at call time
    pub fn wait_for_state_changed(&self) -> ExecutionState {
        let mut state = lock(&self.inner.state);
        let initial = *state;
        while *state == initial {
            state = self
                .inner
                .state_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state
    }

    /// Block until the state equals `target`
    pub fn wait_for_state(&self, target: ExecutionState) {
        let mut state = lock(&self.inner.state);
        while *state != target {
            state = self
                .inner
                .state_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    // ---- hooks --------------------------------------------------------

    /// Attach at the hook's own default target
    pub fn attach_hook(&self, hook: Arc<dyn Hook>) -> Result<bool> {
        let target = hook.default_target();
        self.inner.attach(hook, target)
    }

    pub fn attach_local_hook(&self, hook: Arc<dyn Hook>) -> Result<bool> {
        self.inner.attach(hook, HookTarget::Local)
    }

    pub fn attach_global_hook(&self, hook: Arc<dyn Hook>) -> Result<bool> {
        self.inner.attach(hook, HookTarget::Global)
    }

    pub fn detach_local_hook(&self, hook: &dyn Hook) -> Result<bool> {
        self.inner.detach(hook, HookTarget::Local)
    }

    pub fn detach_global_hook(&self, hook: &dyn Hook) -> Result<bool> {
        self.inner.detach(hook, HookTarget::Global)
    }

    /// Number of currently attached hooks in one scope
    pub fn attached_hook_count(&self, target: HookTarget) -> usize {
        self.inner.attached_count(target)
    }

    /// Inject a command into the training loop
    ///
    /// Attaches a paired local+global one-shot hook sharing a completion
    /// counter; once every worker and the global event have executed the
    /// command, a one-shot hook calling `on_finish` is attached.
    pub fn invoke_command(&self, command: Arc<dyn Command>) -> Result<bool> {
        let weak = Arc::downgrade(&self.inner);
        let finish_command = command.clone();
        let label = format!("command-finish-{:p}", Arc::as_ptr(&command));
        let scheduler: FinishScheduler = Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let finish_command = finish_command.clone();
            let finish_hook = FnHook::new(
                label.clone(),
                TimeStep::limited(1, TimeScale::Iteration, 1),
                move |_, _| finish_command.on_finish(),
            )
            .targeting(HookTarget::Global);
            if let Err(error) = inner.attach(Arc::new(finish_hook), HookTarget::Global) {
                log::error!("failed to attach command finish hook: {error}");
            }
        });

        let (local, global) = CommandHook::pair(command, self.inner.config.worker_count, scheduler);
        let attached = self.inner.attach(Arc::new(local), HookTarget::Local)?;
        if !attached {
            return Ok(false);
        }
        self.inner.attach(Arc::new(global), HookTarget::Global)
    }

    // ---- properties ---------------------------------------------------

    pub fn worker_count(&self) -> usize {
        self.inner.config.worker_count
    }

    pub fn epoch_number(&self) -> usize {
        lock(&self.inner.progress).epoch_number
    }

    pub fn highest_iteration_number(&self) -> usize {
        lock(&self.inner.progress).highest_iteration
    }

    pub fn state(&self) -> ExecutionState {
        self.inner.state()
    }

    pub fn running_time_milliseconds(&self) -> u64 {
        self.inner.runtime_millis()
    }

    /// The process environment's root registry
    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        self.inner.env.registry()
    }

    pub fn environment(&self) -> Arc<Environment> {
        self.inner.env.clone()
    }

    pub fn trainer(&self) -> Arc<dyn Trainer> {
        self.inner.trainer.clone()
    }

    /// Registry view of the global network (parameter handles are live)
    pub fn network_registry(&self) -> Registry {
        lock(&self.inner.global_network).registry()
    }

    /// Independent copy of the global network
    pub fn clone_network(&self) -> Box<dyn Network> {
        lock(&self.inner.global_network).deep_copy()
    }

    pub fn set_network_merger(&self, merger: Box<dyn NetworkMerger>) {
        *lock(&self.inner.merger) = merger;
    }

    pub fn use_sessions(&self) -> bool {
        self.inner.use_sessions()
    }

    pub fn set_use_sessions(&self, enabled: bool) {
        self.inner.use_sessions.store(enabled, Ordering::SeqCst);
    }
}

impl Drop for Operator {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
