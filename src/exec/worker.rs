//! Worker: private replica, training loop, local hook firing
//!
//! Each worker owns a local network replica, optimiser state and data
//! iterator replica, and drives the iteration/epoch cycle on its own
//! thread. The loop is cooperative: lifecycle signals flip the shared
//! state and the worker observes them between iterations, firing the
//! matching local lifecycle events as it goes.

use super::events::{dispatch_background, eject_scale_events, invoke_isolated, split_lanes};
use super::operator::OperatorInner;
use super::state::ExecutionState;
use crate::error::{Error, Result};
use crate::model::{DataBlock, DataIterator, Network, Optimizer};
use crate::registry::{Registry, RegistryResolver, RegistryValue};
use crate::timestep::{TimeScale, TimeStep};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

struct WorkerControl {
    state: ExecutionState,
    /// `None` = free running; `Some(n)` = n iterations remain in this burst
    steps_remaining: Option<u64>,
}

/// Control half shared between the worker thread and the operator
pub(crate) struct WorkerShared {
    pub index: usize,
    control: Mutex<WorkerControl>,
    cond: Condvar,
}

impl WorkerShared {
    fn new(index: usize, budget: Option<u64>) -> Self {
        Self {
            index,
            control: Mutex::new(WorkerControl {
                state: ExecutionState::Running,
                steps_remaining: budget,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ExecutionState {
        self.lock().state
    }

    /// Request a lifecycle transition; illegal transitions are logged and
    /// leave the worker untouched
    pub fn signal(&self, to: ExecutionState) -> Result<()> {
        let mut control = self.lock();
        let from = control.state;
        if !from.can_transition_to(to) {
            log::warn!("worker {}: invalid lifecycle transition: {from} -> {to}", self.index);
            return Err(Error::InvalidLifecycleTransition { from, to });
        }
        control.state = to;
        self.cond.notify_all();
        Ok(())
    }

    /// Run exactly `steps` iterations, then park in Paused
    pub fn begin_step_burst(&self, steps: u64) -> Result<()> {
        let mut control = self.lock();
        let from = control.state;
        if from != ExecutionState::Running && !from.can_transition_to(ExecutionState::Running) {
            log::warn!("worker {}: cannot step from {from}", self.index);
            return Err(Error::InvalidLifecycleTransition {
                from,
                to: ExecutionState::Running,
            });
        }
        control.steps_remaining = Some(steps);
        control.state = ExecutionState::Running;
        self.cond.notify_all();
        Ok(())
    }

    /// Stop regardless of current state (teardown path)
    pub fn force_stop(&self) {
        let mut control = self.lock();
        control.state = ExecutionState::Stopped;
        self.cond.notify_all();
    }

    /// Block until the worker is no longer Running
    pub fn wait_until_halted(&self) {
        let mut control = self.lock();
        while control.state == ExecutionState::Running {
            control = self.cond.wait(control).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn take_step_permit(&self) -> bool {
        let mut control = self.lock();
        match control.steps_remaining {
            None => true,
            Some(0) => false,
            Some(n) => {
                control.steps_remaining = Some(n - 1);
                true
            }
        }
    }

    fn budget_exhausted(&self) -> bool {
        self.lock().steps_remaining == Some(0)
    }

    fn self_pause(&self) {
        let mut control = self.lock();
        if control.state == ExecutionState::Running {
            control.state = ExecutionState::Paused;
            control.steps_remaining = None;
            self.cond.notify_all();
        }
    }

    /// Worker-side wait: returns once the state admits progress again
    fn wait_while_halted(&self) {
        let mut control = self.lock();
        while matches!(
            control.state,
            ExecutionState::Paused | ExecutionState::None
        ) {
            control = self.cond.wait(control).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Operator-held handle to one worker
pub(crate) struct WorkerHandle {
    pub shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn one worker thread
///
/// Workers start Running; pass a step budget to have the worker park in
/// Paused after that many iterations (the `run_once` path).
pub(crate) fn spawn(
    inner: Arc<OperatorInner>,
    index: usize,
    budget: Option<u64>,
) -> WorkerHandle {
    let shared = Arc::new(WorkerShared::new(index, budget));
    let thread_shared = shared.clone();
    let thread = std::thread::Builder::new()
        .name(format!("dirigir-worker-{index}"))
        .spawn(move || run(inner, thread_shared))
        .map_err(|e| log::error!("failed to spawn worker {index}: {e}"))
        .ok();
    if thread.is_none() {
        // A worker with no thread must never look runnable
        shared.force_stop();
    }
    WorkerHandle { shared, thread }
}

/// Worker-thread-owned training state
struct WorkerContext {
    index: usize,
    network: Option<Box<dyn Network>>,
    optimizer: Box<dyn Optimizer>,
    iterator: Box<dyn DataIterator>,
    trainer_registry: Registry,
    epoch: usize,
    iteration: usize,
    stream_active: bool,
    timesteps: HashMap<u32, TimeStep>,
}

impl WorkerContext {
    fn new(index: usize, inner: &OperatorInner) -> Self {
        Self {
            index,
            network: None,
            optimizer: inner.trainer.optimizer(),
            iterator: inner.trainer.training_data_iterator(),
            trainer_registry: inner.trainer.registry(),
            epoch: 0,
            iteration: 0,
            stream_active: false,
            timesteps: HashMap::new(),
        }
    }

    /// Standard registry keys from worker-local state
    fn build_buffer(&self, inner: &OperatorInner) -> Registry {
        let mut buffer = Registry::new();
        if let Some(network) = &self.network {
            buffer.set("network", network.registry());
        }
        buffer.set("optimizer", self.optimizer.registry());
        buffer.set("iterator", self.iterator.registry());
        buffer.set("trainer", self.trainer_registry.clone());
        buffer.set("epoch", self.epoch as i64);
        buffer.set("iteration", self.iteration as i64);
        buffer.set("runtime_millis", inner.runtime_millis() as i64);
        buffer.set(
            "shared",
            RegistryValue::SharedRegistry(inner.env.shared()),
        );
        buffer
    }

    fn run_iteration(&mut self, inner: &OperatorInner, block: &DataBlock) -> Result<()> {
        let network = self.network.as_mut().ok_or_else(|| {
            Error::InvalidConfiguration("worker network not initialised before iteration".into())
        })?;
        inner
            .trainer
            .provide_external_input_data(network.as_mut(), block);
        inner.trainer.run_training_iteration(
            network.as_mut(),
            self.optimizer.as_mut(),
            &mut self.trainer_registry,
            inner.handler.as_ref(),
        )?;
        inner
            .trainer
            .provide_external_output_data(network.as_mut(), block);
        Ok(())
    }
}

/// One full training iteration: epoch boundary, pull, compute, local
/// Iteration event, advance, push
fn do_work(inner: &OperatorInner, ctx: &mut WorkerContext) -> Result<()> {
    let handler = inner.handler.as_ref();

    let block = if ctx.stream_active {
        ctx.iterator.next_block(handler, inner.env.as_ref())
    } else {
        None
    };
    let block = match block {
        Some(block) => block,
        None => {
            // Stream exhausted (or never started): local epoch boundary
            fire_local(inner, ctx, TimeScale::Epoch);
            ctx.epoch += 1;
            ctx.iteration = 0;
            ctx.iterator.begin_epoch();
            ctx.stream_active = true;
            match ctx.iterator.next_block(handler, inner.env.as_ref()) {
                Some(block) => block,
                None => {
                    return Err(Error::WorkerInitialisationFailure { index: ctx.index });
                }
            }
        }
    };

    inner.pull_progress(&mut ctx.network, ctx.iteration);

    if inner.use_sessions() {
        handler.begin_session();
    }
    let outcome = ctx.run_iteration(inner, &block);
    if inner.use_sessions() {
        handler.end_session();
    }
    outcome?;

    fire_local(inner, ctx, TimeScale::Iteration);
    ctx.iteration += 1;

    inner.push_progress(ctx.index, ctx.epoch, ctx.iteration, ctx.network.as_deref())
}

/// Fire the worker-local hooks of one time scale
fn fire_local(inner: &OperatorInner, ctx: &mut WorkerContext, scale: TimeScale) {
    let plan = inner.local_plan_snapshot();
    let fired = eject_scale_events(scale, &plan, &mut ctx.timesteps);
    if fired.is_empty() {
        return;
    }

    let mut buffer = ctx.build_buffer(inner);
    let resolver = RegistryResolver::new(inner.env.registry());
    let (foreground, buckets) = split_lanes(&fired);
    for hook in foreground {
        invoke_isolated(&hook.entry.hook, &mut buffer, &resolver);
    }
    dispatch_background(&inner.background, buckets, &buffer, inner.env.registry());

    for hook in fired.iter().filter(|f| f.now_dead) {
        inner.mark_local_hook_dead(hook.entry.id, ctx.index);
    }
}

fn run(inner: Arc<OperatorInner>, shared: Arc<WorkerShared>) {
    log::debug!("worker {} started", shared.index);
    let mut ctx = WorkerContext::new(shared.index, &inner);
    fire_local(&inner, &mut ctx, TimeScale::Start);

    let mut observed = ExecutionState::Running;
    loop {
        match shared.state() {
            ExecutionState::Running => {
                if observed == ExecutionState::Paused {
                    fire_local(&inner, &mut ctx, TimeScale::Resume);
                }
                observed = ExecutionState::Running;
                if !shared.take_step_permit() {
                    shared.self_pause();
                    continue;
                }
                if let Err(error) = do_work(&inner, &mut ctx) {
                    log::error!("worker {}: {error}; pausing", shared.index);
                    shared.self_pause();
                    continue;
                }
                if shared.budget_exhausted() {
                    shared.self_pause();
                }
            }
            ExecutionState::Paused | ExecutionState::None => {
                if observed != ExecutionState::Paused {
                    fire_local(&inner, &mut ctx, TimeScale::Pause);
                    observed = ExecutionState::Paused;
                }
                shared.wait_while_halted();
            }
            ExecutionState::Stopped => {
                fire_local(&inner, &mut ctx, TimeScale::Stop);
                break;
            }
        }
    }
    log::debug!("worker {} stopped", shared.index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_validates_transition() {
        let shared = WorkerShared::new(0, None);
        assert_eq!(shared.state(), ExecutionState::Running);
        assert!(shared.signal(ExecutionState::Paused).is_ok());
        // Paused -> Paused is illegal
        assert!(shared.signal(ExecutionState::Paused).is_err());
        assert_eq!(shared.state(), ExecutionState::Paused);
        assert!(shared.signal(ExecutionState::Running).is_ok());
        assert!(shared.signal(ExecutionState::Stopped).is_ok());
        // Stopped is terminal for signals
        assert!(shared.signal(ExecutionState::Running).is_err());
    }

    #[test]
    fn test_step_permits() {
        let shared = WorkerShared::new(0, Some(2));
        assert!(shared.take_step_permit());
        assert!(!shared.budget_exhausted());
        assert!(shared.take_step_permit());
        assert!(shared.budget_exhausted());
        assert!(!shared.take_step_permit());
    }

    #[test]
    fn test_unbudgeted_permits_are_unlimited() {
        let shared = WorkerShared::new(0, None);
        for _ in 0..100 {
            assert!(shared.take_step_permit());
        }
        assert!(!shared.budget_exhausted());
    }

    #[test]
    fn test_self_pause_clears_budget() {
        let shared = WorkerShared::new(0, Some(0));
        shared.self_pause();
        assert_eq!(shared.state(), ExecutionState::Paused);
        assert!(!shared.budget_exhausted());
    }

    #[test]
    fn test_begin_step_burst_resumes_from_paused() {
        let shared = WorkerShared::new(0, None);
        shared.signal(ExecutionState::Paused).unwrap();
        shared.begin_step_burst(1).unwrap();
        assert_eq!(shared.state(), ExecutionState::Running);
        assert!(shared.take_step_permit());
        assert!(shared.budget_exhausted());
    }

    #[test]
    fn test_force_stop_ignores_state_machine() {
        let shared = WorkerShared::new(0, None);
        shared.signal(ExecutionState::Paused).unwrap();
        shared.force_stop();
        assert_eq!(shared.state(), ExecutionState::Stopped);
    }
}
