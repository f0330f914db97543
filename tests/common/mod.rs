//! Shared fixtures for the execution-core integration tests
#![allow(dead_code)]

use dirigir::{
    AverageMerger, ComputationHandler, DataBlock, DataIterator, Environment, FnHook, Network,
    NetworkMerger, Operator, OperatorConfig, Optimizer, ParameterNetwork, Registry,
    RegistryResolver, Result, TensorHandle, TimeScale, TimeStep, Trainer,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Thread-safe event log shared between hooks and assertions
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// Poll `cond` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Finite block stream: `blocks_per_epoch` blocks, then exhausted
pub struct BlockIterator {
    blocks_per_epoch: usize,
    position: usize,
}

impl BlockIterator {
    pub fn new(blocks_per_epoch: usize) -> Self {
        Self {
            blocks_per_epoch,
            position: 0,
        }
    }
}

impl DataIterator for BlockIterator {
    fn begin_epoch(&mut self) {
        self.position = 0;
    }

    fn next_block(
        &mut self,
        handler: &dyn ComputationHandler,
        _env: &Environment,
    ) -> Option<DataBlock> {
        if self.position >= self.blocks_per_epoch {
            return None;
        }
        self.position += 1;
        let mut block = DataBlock::new();
        let inputs = handler.create(&[2]);
        handler.fill_scalar(self.position as f32, &inputs);
        block.insert("inputs", inputs);
        Some(block)
    }

    fn shallow_copy(&self) -> Box<dyn DataIterator> {
        Box::new(BlockIterator::new(self.blocks_per_epoch))
    }

    fn registry(&self) -> Registry {
        let mut registry = Registry::new();
        registry.set("blocks_per_epoch", self.blocks_per_epoch as i64);
        registry
    }
}

pub struct FixedLrOptimizer {
    lr: f64,
}

impl FixedLrOptimizer {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl Optimizer for FixedLrOptimizer {
    fn shallow_copy(&self) -> Box<dyn Optimizer> {
        Box::new(FixedLrOptimizer::new(self.lr))
    }

    fn registry(&self) -> Registry {
        let mut registry = Registry::new();
        registry.set("lr", self.lr);
        registry
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Trainer that nudges every parameter by a constant per iteration
///
/// The drift makes merge arithmetic easy to predict: after k iterations a
/// replica's parameters sit exactly k * delta above what it last pulled.
pub struct DriftTrainer {
    pub delta: f32,
    pub blocks_per_epoch: usize,
    /// When set, every training iteration fails with a backend error
    pub failing: bool,
}

impl DriftTrainer {
    pub fn new(delta: f32, blocks_per_epoch: usize) -> Self {
        Self {
            delta,
            blocks_per_epoch,
            failing: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl Trainer for DriftTrainer {
    fn training_data_iterator(&self) -> Box<dyn DataIterator> {
        Box::new(BlockIterator::new(self.blocks_per_epoch))
    }

    fn optimizer(&self) -> Box<dyn Optimizer> {
        Box::new(FixedLrOptimizer::new(0.01))
    }

    fn registry(&self) -> Registry {
        let mut registry = Registry::new();
        registry.set("name", "drift");
        registry
    }

    fn provide_external_input_data(&self, _network: &mut dyn Network, _block: &DataBlock) {}

    fn run_training_iteration(
        &self,
        network: &mut dyn Network,
        _optimizer: &mut dyn Optimizer,
        _registry: &mut Registry,
        handler: &dyn ComputationHandler,
    ) -> Result<()> {
        if self.failing {
            return Err(dirigir::Error::BackendError(
                "injected training failure".to_string(),
            ));
        }
        let view = network.registry();
        for (_, value) in RegistryResolver::resolve_in(&view, "layers.*.*") {
            if let Some(tensor) = value.as_tensor() {
                handler.add_scalar(tensor, self.delta, tensor)?;
            }
        }
        Ok(())
    }

    fn provide_external_output_data(&self, _network: &mut dyn Network, _block: &DataBlock) {}
}

/// Merger wrapper recording the replica count of every merge call
pub struct CountingMerger {
    inner: AverageMerger,
    calls: Arc<Mutex<Vec<usize>>>,
}

impl CountingMerger {
    pub fn new() -> (Self, Arc<Mutex<Vec<usize>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner: AverageMerger::new(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl NetworkMerger for CountingMerger {
    fn merge(
        &self,
        target: &mut dyn Network,
        sources: &[Box<dyn Network>],
        handler: &dyn ComputationHandler,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(sources.len());
        self.inner.merge(target, sources, handler)
    }

    fn key_pattern(&self) -> &str {
        self.inner.key_pattern()
    }
}

/// Two-parameter network starting at a uniform value
pub fn drift_network(initial: f32) -> ParameterNetwork {
    let mut network = ParameterNetwork::new();
    let weights = TensorHandle::from_vec(vec![initial, initial]);
    network.add_parameter("dense", "weights", weights);
    network
}

/// The `layers.dense.weights[0]` value of a network registry view
pub fn weight_of(registry: &Registry) -> f32 {
    registry
        .get_path("layers.dense.weights")
        .and_then(|v| v.as_tensor().cloned())
        .map(|t| t.first())
        .unwrap_or(f32::NAN)
}

/// Hook recording its label on every invocation
pub fn counting_hook(recorder: &Recorder, label: &str, step: TimeStep) -> Arc<FnHook> {
    let recorder = recorder.clone();
    let event = label.to_string();
    Arc::new(FnHook::new(label, step, move |_, _| {
        recorder.record(event.clone());
    }))
}

/// Operator over a drift trainer, with merge-call tracking
pub fn drift_operator(
    worker_count: usize,
    blocks_per_epoch: usize,
    delta: f32,
) -> (Operator, Arc<Mutex<Vec<usize>>>) {
    let operator = Operator::new(
        OperatorConfig::new(worker_count),
        Arc::new(dirigir::CpuHandler::new()),
        Arc::new(DriftTrainer::new(delta, blocks_per_epoch)),
        Box::new(drift_network(0.0)),
        Arc::new(Environment::new()),
    )
    .unwrap();
    let (merger, calls) = CountingMerger::new();
    operator.set_network_merger(Box::new(merger));
    (operator, calls)
}

/// Attach global Iteration/Epoch counters to an operator
pub fn attach_global_counters(operator: &Operator, recorder: &Recorder) {
    let iteration = counting_hook(
        recorder,
        "global-iteration",
        TimeStep::every(1, TimeScale::Iteration),
    );
    let epoch = counting_hook(recorder, "global-epoch", TimeStep::every(1, TimeScale::Epoch));
    operator.attach_global_hook(iteration).unwrap();
    operator.attach_global_hook(epoch).unwrap();
}

/// Step the operator `steps` times via `start_once`, waiting for the
/// paused state after each step
pub fn step_times(operator: &Operator, steps: usize) {
    for _ in 0..steps {
        operator.start_once().unwrap();
        operator.wait_for_state(dirigir::ExecutionState::Paused);
    }
}
