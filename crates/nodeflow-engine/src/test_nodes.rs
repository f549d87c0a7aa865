//! Small node implementations used by the engine's unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::NodeError;
use crate::node::{Node, NodeState, PortValuesExt, Progress};
use crate::types::{PortKind, PortMap, PortType, PortValue, PortValues, TypeDescriptor};

fn ports(entries: &[(&str, PortType)]) -> PortMap {
    entries
        .iter()
        .map(|(name, ty)| (name.to_string(), ty.clone()))
        .collect()
}

fn single(port: &str, value: PortValue) -> PortValues {
    let mut out = PortValues::new();
    out.insert(port.to_string(), value);
    out
}

fn int() -> TypeDescriptor {
    TypeDescriptor::named("int")
}

/// No inputs, emits a fixed value on `out`
pub struct Constant {
    state: NodeState,
    value: Value,
}

impl Constant {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            state: NodeState::new(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Node for Constant {
    fn type_name(&self) -> &str {
        "Constant"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::any())])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        Ok(single("out", PortValue::Data(self.value.clone())))
    }
}

/// `int` in, `int` out, adds one
pub struct AddOne {
    state: NodeState,
}

impl AddOne {
    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
        }
    }
}

#[async_trait]
impl Node for AddOne {
    fn type_name(&self) -> &str {
        "Add One"
    }

    fn category(&self) -> &str {
        "Math"
    }

    fn input_ports(&self) -> PortMap {
        ports(&[("in", PortType::value(int()))])
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::value(int()))])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let value = inputs.get_i64("in")?;
        Ok(single("out", PortValue::Data(json!(value + 1))))
    }
}

/// Emits one item per activation on a generator port, then `Exhausted`
pub struct Producer {
    state: NodeState,
    items: Vec<Value>,
    position: usize,
    progress: Option<Progress>,
}

impl Producer {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            state: NodeState::new(),
            items,
            position: 0,
            progress: None,
        }
    }
}

#[async_trait]
impl Node for Producer {
    fn type_name(&self) -> &str {
        "Producer"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::generator(TypeDescriptor::any()))])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn init(&mut self) -> Result<(), NodeError> {
        self.position = 0;
        Ok(())
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        let total = self.items.len() as u64;
        match self.items.get(self.position) {
            Some(item) => {
                self.position += 1;
                self.progress = Some(Progress::new(self.position as u64, total));
                Ok(single("out", PortValue::Data(item.clone())))
            }
            None => {
                self.position = 0;
                self.progress = Some(Progress::new(total, total));
                Ok(single("out", PortValue::Exhausted))
            }
        }
    }

    fn progress(&self) -> Option<Progress> {
        self.progress
    }
}

/// Generator that never ends
pub struct Forever {
    state: NodeState,
    next: i64,
}

impl Forever {
    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
            next: 0,
        }
    }
}

#[async_trait]
impl Node for Forever {
    fn type_name(&self) -> &str {
        "Forever"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::generator(int()))])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        self.next += 1;
        Ok(single("out", PortValue::Data(json!(self.next))))
    }
}

/// Buffers a generator input into a list, `Pending` until exhaustion
pub struct Collector {
    state: NodeState,
    items: Vec<Value>,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
            items: Vec::new(),
        }
    }
}

#[async_trait]
impl Node for Collector {
    fn type_name(&self) -> &str {
        "Collector"
    }

    fn input_ports(&self) -> PortMap {
        ports(&[("in", PortType::generator(TypeDescriptor::any()))])
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::value(TypeDescriptor::list(TypeDescriptor::any())))])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        match inputs.get("in") {
            Some(PortValue::Data(value)) => {
                self.items.push(value.clone());
                Ok(single("out", PortValue::Pending))
            }
            Some(PortValue::Pending) => Ok(single("out", PortValue::Pending)),
            _ => {
                let items = std::mem::take(&mut self.items);
                Ok(single("out", PortValue::Data(Value::Array(items))))
            }
        }
    }
}

/// Routes `input` to the `true` or `false` event output
pub struct Branch {
    state: NodeState,
}

impl Branch {
    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
        }
    }
}

#[async_trait]
impl Node for Branch {
    fn type_name(&self) -> &str {
        "Branch"
    }

    fn input_ports(&self) -> PortMap {
        ports(&[
            ("condition", PortType::value(TypeDescriptor::named("bool"))),
            ("input", PortType::any()),
        ])
    }

    fn output_ports(&self) -> PortMap {
        ports(&[
            ("true", PortType::event(TypeDescriptor::any())),
            ("false", PortType::event(TypeDescriptor::any())),
        ])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        let condition = inputs.get_bool("condition")?;
        let value = inputs.get("input").cloned().unwrap_or_else(PortValue::null);
        let mut out = PortValues::new();
        let (taken, skipped) = if condition { ("true", "false") } else { ("false", "true") };
        out.insert(taken.to_string(), value);
        out.insert(skipped.to_string(), PortValue::Exhausted);
        Ok(out)
    }
}

/// Non-cache counter, each run yields the next integer
pub struct Counter {
    state: NodeState,
    count: i64,
    runs: Arc<AtomicUsize>,
}

impl Counter {
    pub fn new(runs: Arc<AtomicUsize>) -> Self {
        Self {
            state: NodeState::new(),
            count: 0,
            runs,
        }
    }
}

#[async_trait]
impl Node for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::value(int()))])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn cache_enabled(&self) -> bool {
        false
    }

    async fn init(&mut self) -> Result<(), NodeError> {
        self.count = 0;
        Ok(())
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.count += 1;
        Ok(single("out", PortValue::Data(json!(self.count))))
    }
}

/// Records every input map it receives and passes `in` through to `out`
pub struct Recorder {
    state: NodeState,
    kind: PortKind,
    seen: Arc<Mutex<Vec<PortValues>>>,
}

impl Recorder {
    pub fn new(kind: PortKind, seen: Arc<Mutex<Vec<PortValues>>>) -> Self {
        Self {
            state: NodeState::new(),
            kind,
            seen,
        }
    }
}

#[async_trait]
impl Node for Recorder {
    fn type_name(&self) -> &str {
        "Recorder"
    }

    fn input_ports(&self) -> PortMap {
        ports(&[("in", PortType::any().with_kind(self.kind))])
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::any())])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        self.seen.lock().push(inputs.clone());
        let value = match inputs.get("in") {
            Some(PortValue::Data(value)) => PortValue::Data(value.clone()),
            _ => PortValue::null(),
        };
        Ok(single("out", value))
    }
}

/// Node whose `init` and `run` can be told to fail, counting init calls
pub struct Tracked {
    state: NodeState,
    lazy: bool,
    fail_init: bool,
    fail_run: bool,
    panic_run: bool,
    inits: Arc<AtomicUsize>,
}

impl Tracked {
    pub fn new(inits: Arc<AtomicUsize>) -> Self {
        Self {
            state: NodeState::new(),
            lazy: false,
            fail_init: false,
            fail_run: false,
            panic_run: false,
            inits,
        }
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }

    pub fn panicking_run(mut self) -> Self {
        self.panic_run = true;
        self
    }
}

#[async_trait]
impl Node for Tracked {
    fn type_name(&self) -> &str {
        "Tracked"
    }

    fn input_ports(&self) -> PortMap {
        ports(&[("in", PortType::any())])
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::any())])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn lazy_init(&self) -> bool {
        self.lazy
    }

    async fn init(&mut self) -> Result<(), NodeError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(NodeError::failed("init failed"));
        }
        Ok(())
    }

    async fn run(&mut self, inputs: PortValues) -> Result<PortValues, NodeError> {
        if self.fail_run {
            return Err(NodeError::failed("run failed"));
        }
        if self.panic_run {
            let empty: Vec<Value> = Vec::new();
            return Ok(single("out", PortValue::Data(empty[0].clone())));
        }
        let value = inputs.get("in").cloned().unwrap_or_else(PortValue::null);
        Ok(single("out", value))
    }
}

/// Returns a fixed output map regardless of its declaration
pub struct Misbehaving {
    state: NodeState,
    outputs: PortValues,
}

impl Misbehaving {
    pub fn new(outputs: PortValues) -> Self {
        Self {
            state: NodeState::new(),
            outputs,
        }
    }
}

#[async_trait]
impl Node for Misbehaving {
    fn type_name(&self) -> &str {
        "Misbehaving"
    }

    fn input_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn output_ports(&self) -> PortMap {
        ports(&[("out", PortType::any())])
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        Ok(self.outputs.clone())
    }
}

/// Node with a single `any` input whose connection hook always fails
pub struct Picky {
    state: NodeState,
}

impl Picky {
    pub fn new() -> Self {
        Self {
            state: NodeState::new(),
        }
    }
}

#[async_trait]
impl Node for Picky {
    fn type_name(&self) -> &str {
        "Picky"
    }

    fn input_ports(&self) -> PortMap {
        ports(&[("in", PortType::any())])
    }

    fn output_ports(&self) -> PortMap {
        PortMap::new()
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn on_input_connected(&mut self, port: &str, _source: &PortType) -> Result<(), NodeError> {
        Err(NodeError::failed(format!("refusing connection on '{}'", port)))
    }

    async fn run(&mut self, _inputs: PortValues) -> Result<PortValues, NodeError> {
        Ok(PortValues::new())
    }
}
