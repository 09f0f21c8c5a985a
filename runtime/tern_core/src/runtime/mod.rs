//! The runtime object and its cooperative scheduler.
//!
//! # Architecture
//!
//! A [`Runtime`] owns everything that would otherwise be process-wide: the
//! handler registry, the heap, globals, host roots and the tasks. Several
//! runtimes can coexist; nothing is shared between them.
//!
//! Scheduling is cooperative. [`Runtime::run`] takes tasks off a ready queue
//! and runs a slice of each until it completes, fails, goes deep (requeued
//! at the back) or idles. An idle task's blocking operation runs on a worker
//! thread; its completion comes back over a channel. The only place the
//! scheduler itself blocks is waiting on that channel when no task is
//! ready.

mod builder;

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use rustc_hash::FxHashMap;

use crate::config::RuntimeConfig;
use crate::context::{BlockingOp, CancelToken, ExecutionContext, TaskId, TaskState, Yield};
use crate::errors::{access_error, Failure, Outcome, RegistryError};
use crate::gc::{CollectStats, Heap, Tracer};
use crate::handler::{FunctionRef, HandlerRef, HandlerRegistry};
use crate::step::StepRef;
use crate::value::Value;
use crate::vm::{Globals, Slice, Vm};

pub use builder::RuntimeBuilder;

/// Handle of a host-registered root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RootId(u64);

struct IoCompletion {
    task: TaskId,
    op: Box<dyn BlockingOp>,
    outcome: Outcome,
}

pub struct Runtime {
    config: RuntimeConfig,
    registry: HandlerRegistry,
    heap: Heap,
    globals: Globals,
    roots: FxHashMap<RootId, Value>,
    tasks: FxHashMap<TaskId, ExecutionContext>,
    ready: VecDeque<TaskId>,
    next_task: u64,
    next_root: u64,
    io_tx: Sender<IoCompletion>,
    io_rx: Receiver<IoCompletion>,
    in_flight: usize,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let (io_tx, io_rx) = channel::unbounded();
        Runtime {
            heap: Heap::new(config.gc_threshold),
            config,
            registry: HandlerRegistry::new(),
            globals: Globals::default(),
            roots: FxHashMap::default(),
            tasks: FxHashMap::default(),
            ready: VecDeque::new(),
            next_task: 1,
            next_root: 0,
            io_tx,
            io_rx,
            in_flight: 0,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // Registration

    /// Publish a type handler. Must happen before tasks that use it run.
    pub fn register_handler(&mut self, handler: HandlerRef) -> Result<HandlerRef, RegistryError> {
        self.registry.register(handler)
    }

    /// Bind a native function to a global of the same name.
    pub fn register_function(&mut self, function: FunctionRef) -> Value {
        let value = Value::function(function);
        let name = value.as_function().map(|f| f.name().to_owned()).unwrap_or_default();
        self.globals.insert(name, value.clone());
        value
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    // Roots

    /// Keep `value` alive until [`Runtime::remove_root`].
    pub fn add_root(&mut self, value: Value) -> RootId {
        let id = RootId(self.next_root);
        self.next_root += 1;
        self.roots.insert(id, value);
        id
    }

    pub fn remove_root(&mut self, id: RootId) -> Option<Value> {
        self.roots.remove(&id)
    }

    // Tasks

    /// Create a task running `step` and queue it.
    pub fn spawn(&mut self, step: StepRef) -> TaskId {
        let id = TaskId::new(self.next_task);
        self.next_task += 1;
        let mut ctx = ExecutionContext::new(id);
        ctx.push_step(step);
        self.tasks.insert(id, ctx);
        self.ready.push_back(id);
        tracing::debug!(task = %id, "spawned");
        id
    }

    pub fn task(&self, id: TaskId) -> Option<&ExecutionContext> {
        self.tasks.get(&id)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(ExecutionContext::state)
    }

    pub fn cancel_token(&self, id: TaskId) -> Option<CancelToken> {
        self.tasks.get(&id).map(|ctx| ctx.cancel_token().clone())
    }

    /// Request cooperative cancellation of a task.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.tasks.get(&id) {
            Some(ctx) => {
                ctx.interrupt();
                true
            }
            None => false,
        }
    }

    /// Remove a finished task and return its outcome.
    pub fn join(&mut self, id: TaskId) -> Option<Outcome<Value>> {
        let outcome = self.tasks.get_mut(&id)?.take_outcome()?;
        self.tasks.remove(&id);
        Some(outcome)
    }

    /// Spawn `step`, run every task to quiescence and return its outcome.
    pub fn evaluate(&mut self, step: StepRef) -> Outcome<Value> {
        let id = self.spawn(step);
        self.run();
        self.join(id)
            .unwrap_or_else(|| Err(access_error(format!("{id} did not finish"))))
    }

    /// Run `f` against a scratch context outside any task.
    pub fn with_vm<R>(&mut self, f: impl FnOnce(&mut Vm<'_>) -> R) -> R {
        let mut ctx = ExecutionContext::new(TaskId::HOST);
        let mut vm = Vm::new(
            &mut ctx,
            &mut self.heap,
            &self.registry,
            &mut self.globals,
            &self.config,
        );
        f(&mut vm)
    }

    // Scheduling

    /// Run until no task is ready and no blocking operation is in flight.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&mut self) {
        loop {
            while let Ok(completion) = self.io_rx.try_recv() {
                self.resume(completion);
            }
            if let Some(id) = self.ready.pop_front() {
                self.run_task(id);
                if self.heap.should_collect() {
                    self.collect();
                }
                continue;
            }
            if self.in_flight == 0 {
                break;
            }
            match self.io_rx.recv() {
                Ok(completion) => self.resume(completion),
                Err(_) => break,
            }
        }
    }

    fn run_task(&mut self, id: TaskId) {
        let Some(ctx) = self.tasks.get_mut(&id) else {
            return;
        };
        let slice = Vm::new(
            ctx,
            &mut self.heap,
            &self.registry,
            &mut self.globals,
            &self.config,
        )
        .run_slice();
        match slice {
            Slice::Yielded(Yield::Deep) => self.ready.push_back(id),
            Slice::Yielded(Yield::Io) => self.start_blocking(id),
            Slice::Completed => {
                tracing::debug!(task = %id, "completed");
                self.finished();
            }
            Slice::Failed => {
                if let Some(failure) = self.tasks.get(&id).and_then(ExecutionContext::failure) {
                    tracing::warn!(task = %id, %failure, unwound = ?failure.unwound(), "task failed");
                }
                self.finished();
            }
        }
    }

    fn finished(&mut self) {
        if self.config.collect_on_completion {
            self.collect();
        }
    }

    fn start_blocking(&mut self, id: TaskId) {
        let Some(ctx) = self.tasks.get_mut(&id) else {
            return;
        };
        let Some(mut op) = ctx.pending.take() else {
            // Idle without an operation: resume immediately.
            self.resume_with(id, None, Ok(()));
            return;
        };
        let mut held = Tracer::default();
        op.trace(&mut held);
        ctx.in_flight = held.into_instances();
        let cancel = ctx.cancel_token().clone();
        let tx = self.io_tx.clone();
        let name = format!("{}-{}", self.config.io_thread_name, id.raw());
        tracing::debug!(task = %id, op = op.name(), thread = %name, "blocking operation started");
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let outcome = op.block(&cancel);
            // The runtime may be gone; nobody is left to resume.
            let _ = tx.send(IoCompletion {
                task: id,
                op,
                outcome,
            });
        });
        match spawned {
            Ok(_) => self.in_flight += 1,
            Err(err) => self.resume_with(id, None, Err(Failure::from(err))),
        }
    }

    fn resume(&mut self, completion: IoCompletion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.resume_with(completion.task, Some(completion.op), completion.outcome);
    }

    /// Unidle a task and finish its blocking operation.
    fn resume_with(&mut self, id: TaskId, op: Option<Box<dyn BlockingOp>>, outcome: Outcome) {
        let Some(ctx) = self.tasks.get_mut(&id) else {
            return;
        };
        let mut vm = Vm::new(
            ctx,
            &mut self.heap,
            &self.registry,
            &mut self.globals,
            &self.config,
        );
        let resumed = vm
            .unidle()
            .and(outcome)
            .and_then(|()| op.map_or(Ok(()), |op| op.complete(&mut vm)));
        vm.in_flight.clear();
        let runnable = match resumed {
            Ok(()) => true,
            Err(failure) => vm.unwind(failure),
        };
        if runnable {
            self.ready.push_back(id);
        } else {
            if let Some(failure) = self.tasks.get(&id).and_then(ExecutionContext::failure) {
                tracing::warn!(task = %id, %failure, "task failed after blocking operation");
            }
            self.finished();
        }
    }

    // Collection

    /// Run a full collection pass over every root the runtime knows.
    pub fn collect(&mut self) -> CollectStats {
        let Runtime {
            heap,
            tasks,
            globals,
            roots,
            ..
        } = self;
        heap.collect(|tracer| {
            for ctx in tasks.values() {
                ctx.trace(tracer);
            }
            tracer.values(globals.values());
            tracer.values(roots.values());
        })
    }

    /// Store host data as a tracked instance.
    pub fn gc_store<T: std::any::Any + Send>(&mut self, handler: &HandlerRef, data: T) -> Value {
        let instance = self.heap.gc_store(Arc::clone(handler), Box::new(data));
        Value::tracked(Arc::clone(handler), instance)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Wake workers still blocked on behalf of tasks.
        for ctx in self.tasks.values() {
            ctx.interrupt();
        }
    }
}
