//! The view handed to handlers, steps and native functions.
//!
//! A [`Vm`] bundles the running task's [`ExecutionContext`] with the shared
//! runtime parts (heap, handler registry, globals, configuration) for the
//! duration of one slice. It derefs to the context, so stack operations read
//! as `vm.push(..)`, `vm.operands::<2>()` and so on.
//!
//! The interpreter loop lives here too: [`Vm::run_slice`] applies steps until
//! the continuation stack empties, a step fails without recovery, or the
//! task yields.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::RuntimeConfig;
use crate::context::{ExecutionContext, TaskState, Yield};
use crate::errors::{access_error, stack_underflow, Failure, Outcome};
use crate::gc::Heap;
use crate::handler::{dispatch, HandlerRef, HandlerRegistry, Operator};
use crate::value::{same_handler, Value};

/// Runtime-wide named values. Every entry is a collector root.
pub type Globals = FxHashMap<String, Value>;

/// How an operator invocation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// The result is on the stack.
    Done,
    /// The handler scheduled continuations or idled; they produce the result.
    Deferred,
}

impl Completion {
    pub fn is_deferred(self) -> bool {
        self == Completion::Deferred
    }
}

/// Outcome of one scheduler slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slice {
    Completed,
    Failed,
    Yielded(Yield),
}

pub struct Vm<'a> {
    ctx: &'a mut ExecutionContext,
    heap: &'a mut Heap,
    registry: &'a HandlerRegistry,
    globals: &'a mut Globals,
    config: &'a RuntimeConfig,
}

impl<'a> Vm<'a> {
    pub fn new(
        ctx: &'a mut ExecutionContext,
        heap: &'a mut Heap,
        registry: &'a HandlerRegistry,
        globals: &'a mut Globals,
        config: &'a RuntimeConfig,
    ) -> Self {
        Vm {
            ctx,
            heap,
            registry,
            globals,
            config,
        }
    }

    pub fn heap(&self) -> &Heap {
        &*self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut *self.heap
    }

    pub fn registry(&self) -> &'a HandlerRegistry {
        self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.config
    }

    pub fn context(&mut self) -> &mut ExecutionContext {
        &mut *self.ctx
    }

    // Operator dispatch

    /// Invoke `op` on the operands at the top of the stack.
    ///
    /// The handler of the deepest operand is selected. Unless the handler
    /// went deep or idled, the stack afterwards holds exactly one slot in
    /// place of the operands.
    pub fn invoke(&mut self, op: &Operator) -> Outcome<Completion> {
        let arity = op.arity();
        let depth = self.ctx.depth();
        let base = depth
            .checked_sub(arity)
            .ok_or_else(|| stack_underflow(arity, depth))?;
        let (handler, instance) = self.registry.resolve(&self.ctx.data[base]);
        let watch = Watch::start(&*self.ctx);
        dispatch(handler.as_ref(), self, op, instance)?;
        Ok(self.settle(watch, &handler, op, base))
    }

    /// Run `handler.create` over `arg_count` arguments.
    pub fn create(&mut self, handler: &HandlerRef, arg_count: usize) -> Outcome<Completion> {
        let depth = self.ctx.depth();
        let base = depth
            .checked_sub(arg_count)
            .ok_or_else(|| stack_underflow(arg_count, depth))?;
        let watch = Watch::start(&*self.ctx);
        handler.create(self, arg_count)?;
        Ok(self.settle(watch, handler, "create", base))
    }

    fn settle(
        &mut self,
        watch: Watch,
        handler: &HandlerRef,
        op: impl fmt::Display,
        base: usize,
    ) -> Completion {
        if watch.deferred(&*self.ctx) {
            if self.ctx.yield_request.is_none() {
                self.ctx.yield_request = Some(Yield::Deep);
            }
            tracing::trace!(%op, handler = handler.info().name(), "operator went deep");
            return Completion::Deferred;
        }
        debug_assert_eq!(
            self.ctx.depth(),
            base + 1,
            "{} broke the stack convention in {op}",
            handler.info().name()
        );
        Completion::Done
    }

    // Values

    /// Hand `data` to the collector as an instance of `handler`.
    pub fn gc_store<T: Any + Send>(&mut self, handler: &HandlerRef, data: T) -> Value {
        let instance = self.heap.gc_store(Arc::clone(handler), Box::new(data));
        Value::tracked(Arc::clone(handler), instance)
    }

    pub fn new_string(&mut self, text: impl Into<String>) -> Value {
        let handler = self.registry.string_handler();
        self.gc_store(handler, text.into())
    }

    /// Text of a string value.
    pub fn as_str(&self, value: &Value) -> Option<&str> {
        let deep = value.as_deep()?;
        if !same_handler(deep.handler(), self.registry.string_handler()) {
            return None;
        }
        self.heap
            .get::<String>(deep.instance())
            .ok()
            .map(String::as_str)
    }

    /// Text of a string, or the one-level description of anything else.
    pub fn display_text(&self, value: &Value) -> String {
        match self.as_str(value) {
            Some(text) => text.to_owned(),
            None => self.describe(value, Some(1), None),
        }
    }

    pub fn describe(&self, value: &Value, depth: Option<usize>, max_len: Option<usize>) -> String {
        value.describe(&*self.heap, depth, max_len)
    }

    /// Describe with the configured default limits.
    pub fn describe_default(&self, value: &Value) -> String {
        self.describe(
            value,
            self.config.describe_depth,
            self.config.describe_max_len,
        )
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        a.compare(b, &*self.heap)
    }

    /// Flat copy of a value's instance as a new tracked instance.
    pub fn clone_value(&mut self, value: &Value) -> Outcome<Value> {
        let Some(deep) = value.as_deep() else {
            return Ok(value.clone());
        };
        let data = deep.handler().clone_instance(&*self.heap, deep.instance())?;
        let instance = self.heap.gc_store(Arc::clone(deep.handler()), data);
        Ok(Value::tracked(Arc::clone(deep.handler()), instance))
    }

    pub fn serialize(&self, value: &Value, out: &mut dyn Write) -> Outcome {
        let deep = value
            .as_deep()
            .ok_or_else(|| access_error(format!("{} has no serialized form", value.type_name())))?;
        deep.handler().serialize(&*self.heap, deep.instance(), out)
    }

    pub fn deserialize(&mut self, handler: &HandlerRef, input: &mut dyn Read) -> Outcome<Value> {
        let data = handler.deserialize(input)?;
        let instance = self.heap.gc_store(Arc::clone(handler), data);
        Ok(Value::tracked(Arc::clone(handler), instance))
    }

    // Globals

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    // Interpreter loop

    /// Apply steps until the task completes, fails or yields.
    pub(crate) fn run_slice(&mut self) -> Slice {
        self.ctx.state = TaskState::Running;
        loop {
            if let Some(request) = self.ctx.yield_request.take() {
                self.ctx.state = match request {
                    Yield::Deep => TaskState::SuspendedDeep,
                    Yield::Io => TaskState::SuspendedIo,
                };
                return Slice::Yielded(request);
            }
            let Some(frame) = self.ctx.code.pop() else {
                self.ctx.complete();
                return Slice::Completed;
            };
            let step = Arc::clone(&frame.step);
            let seq = frame.seq;
            tracing::trace!(task = %self.ctx.id(), step = step.name(), seq, "apply");
            self.ctx.current = Some(frame);
            let outcome = step.apply(self, seq);
            match outcome {
                Ok(()) => self.ctx.disarm(),
                Err(failure) => {
                    if !self.unwind(failure) {
                        return Slice::Failed;
                    }
                }
            }
        }
    }

    /// Unwind to the nearest recovery point. Returns `false` when none
    /// recovered and the task is now failed.
    pub(crate) fn unwind(&mut self, mut failure: Failure) -> bool {
        self.ctx.abandon_idle();
        self.ctx.yield_request = None;
        self.ctx.armed.clear();
        let mut failed_depth = self.ctx.depth();
        if let Some(current) = self.ctx.current.take() {
            failed_depth = current.data_depth;
            failure.record_unwind(current.step.name());
        }
        while let Some(frame) = self.ctx.code.pop() {
            if !frame.step.is_recovery_point(frame.seq) {
                failure.record_unwind(frame.step.name());
                continue;
            }
            self.ctx.data.truncate(frame.data_depth);
            let step = Arc::clone(&frame.step);
            tracing::debug!(task = %self.ctx.id(), step = step.name(), %failure, "recovering");
            self.ctx.current = Some(frame);
            match step.recover(self, failure) {
                Ok(()) => return true,
                Err(rethrown) => {
                    failure = rethrown;
                    self.ctx.armed.clear();
                    if let Some(current) = self.ctx.current.take() {
                        failed_depth = current.data_depth;
                        failure.record_unwind(current.step.name());
                    }
                }
            }
        }
        tracing::debug!(task = %self.ctx.id(), %failure, "unrecovered failure");
        self.ctx.fail(failure, failed_depth);
        false
    }
}

impl Deref for Vm<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        &*self.ctx
    }
}

impl DerefMut for Vm<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        &mut *self.ctx
    }
}

/// Snapshot taken before a handler call to detect deferral.
#[derive(Clone, Copy)]
struct Watch {
    code_len: usize,
    was_idle: bool,
}

impl Watch {
    fn start(ctx: &ExecutionContext) -> Self {
        Watch {
            code_len: ctx.code.len(),
            was_idle: ctx.idle,
        }
    }

    fn deferred(self, ctx: &ExecutionContext) -> bool {
        ctx.code.len() > self.code_len || (ctx.idle && !self.was_idle)
    }
}
