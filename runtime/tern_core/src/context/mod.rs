//! Per-task execution state.
//!
//! # Architecture
//!
//! An [`ExecutionContext`] owns two stacks:
//!
//! - the **data stack** of [`Value`]s that operators read their operands
//!   from and write their single result to
//! - the **continuation stack** of steps still to run
//!
//! The interpreter loop ([`Vm::run_slice`](crate::vm::Vm)) pops the top
//! frame and applies its step. A step that must resume later re-pushes
//! itself with a new sequence number ([`ExecutionContext::reenter`]) before
//! pushing the children it waits on. Control flow and operator callbacks are
//! expressed this way, so the host stack never grows with the program.
//!
//! # Going Deep
//!
//! An operator that needs the interpreter (for example stringifying an
//! element whose own `to_string` pushes steps) arms a resumption with
//! [`ExecutionContext::if_deep`] before doing work that might schedule
//! steps. The first [`ExecutionContext::push_step`] after that pushes the
//! armed resumption underneath, so it runs once the nested work is done.
//! [`ExecutionContext::went_deep`] then tells the operator whether it must
//! return and leave the result to the resumption.
//!
//! # Suspension
//!
//! [`ExecutionContext::idle`] and [`ExecutionContext::unidle`] bracket a
//! blocking operation; the scheduler runs other tasks in between. Every
//! `idle` is matched by exactly one `unidle`, including when the task
//! unwinds.

mod blocking;

use std::sync::Arc;

use crate::errors::{access_error, interrupted, stack_underflow, Failure, Outcome};
use crate::gc::{Instance, Tracer};
use crate::step::StepRef;
use crate::value::Value;

pub use blocking::{BlockingOp, CancelToken};

/// Identifier of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Id of scratch contexts created for host-side evaluation.
    pub const HOST: TaskId = TaskId(0);

    pub(crate) const fn new(raw: u64) -> Self {
        TaskId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Lifecycle of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Running,
    SuspendedIo,
    SuspendedDeep,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Reason a slice stopped before the continuation stack ran dry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Yield {
    Deep,
    Io,
}

/// Position of an armed resumption, returned by `if_deep`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct DeepMark(usize);

pub(crate) struct CodeFrame {
    pub(crate) step: StepRef,
    pub(crate) seq: usize,
    pub(crate) data_depth: usize,
}

pub struct ExecutionContext {
    id: TaskId,
    pub(crate) data: Vec<Value>,
    pub(crate) code: Vec<CodeFrame>,
    pub(crate) state: TaskState,
    /// Frame of the step being applied.
    pub(crate) current: Option<CodeFrame>,
    pub(crate) armed: Vec<CodeFrame>,
    pub(crate) yield_request: Option<Yield>,
    cancel: CancelToken,
    pub(crate) idle: bool,
    pub(crate) pending: Option<Box<dyn BlockingOp>>,
    /// Instances a handed-off blocking operation will push on completion.
    pub(crate) in_flight: Vec<Instance>,
    result: Option<Value>,
    failure: Option<Failure>,
}

impl ExecutionContext {
    pub fn new(id: TaskId) -> Self {
        ExecutionContext {
            id,
            data: Vec::new(),
            code: Vec::new(),
            state: TaskState::Running,
            current: None,
            armed: Vec::new(),
            yield_request: None,
            cancel: CancelToken::new(),
            idle: false,
            pending: None,
            in_flight: Vec::new(),
            result: None,
            failure: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub(crate) fn take_outcome(&mut self) -> Option<Outcome<Value>> {
        match self.state {
            TaskState::Completed => Some(Ok(self.result.take().unwrap_or_default())),
            TaskState::Failed => self.failure.take().map(Err),
            _ => None,
        }
    }

    // Data stack

    #[inline]
    pub fn depth(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub fn push(&mut self, value: Value) {
        self.data.push(value);
    }

    pub fn pop(&mut self) -> Outcome<Value> {
        self.data.pop().ok_or_else(|| stack_underflow(1, 0))
    }

    pub fn top(&self) -> Outcome<&Value> {
        self.data.last().ok_or_else(|| stack_underflow(1, 0))
    }

    /// The top `N` slots, deepest first, without popping them.
    pub fn operands<const N: usize>(&self) -> Outcome<&[Value; N]> {
        let depth = self.data.len();
        let start = depth
            .checked_sub(N)
            .ok_or_else(|| stack_underflow(N, depth))?;
        <&[Value; N]>::try_from(&self.data[start..]).map_err(|_| stack_underflow(N, depth))
    }

    /// Argument `index` of a call with `arg_count` arguments on the stack.
    pub fn param(&self, index: usize, arg_count: usize) -> Option<&Value> {
        if index >= arg_count {
            return None;
        }
        let base = self.data.len().checked_sub(arg_count)?;
        self.data.get(base + index)
    }

    /// The callee slot below `arg_count` arguments.
    pub fn callee(&self, arg_count: usize) -> Outcome<&Value> {
        let depth = self.data.len();
        depth
            .checked_sub(arg_count + 1)
            .and_then(|at| self.data.get(at))
            .ok_or_else(|| stack_underflow(arg_count + 1, depth))
    }

    /// Replace the top `consumed` slots with `value`.
    pub fn stack_result(&mut self, consumed: usize, value: Value) -> Outcome {
        let depth = self.data.len();
        let base = depth
            .checked_sub(consumed)
            .ok_or_else(|| stack_underflow(consumed, depth))?;
        self.data.truncate(base);
        self.data.push(value);
        Ok(())
    }

    // Continuation stack

    pub fn code_depth(&self) -> usize {
        self.code.len()
    }

    /// Schedule `step` to run next.
    pub fn push_step(&mut self, step: StepRef) {
        self.push_step_at(step, 0);
    }

    /// Schedule `step` to run next, resuming at `seq`.
    pub fn push_step_at(&mut self, step: StepRef, seq: usize) {
        self.enter_deep();
        self.push_frame(step, seq);
    }

    fn push_frame(&mut self, step: StepRef, seq: usize) {
        let data_depth = self.data.len();
        self.code.push(CodeFrame {
            step,
            seq,
            data_depth,
        });
    }

    /// Re-push the running step so it resumes at `seq` after whatever is
    /// pushed next.
    pub fn reenter(&mut self, seq: usize) -> Outcome {
        let step = self.current_step()?;
        self.push_step_at(step, seq);
        Ok(())
    }

    fn current_step(&self) -> Outcome<StepRef> {
        self.current
            .as_ref()
            .map(|frame| Arc::clone(&frame.step))
            .ok_or_else(|| access_error("no step is running"))
    }

    /// Arm `step` as the resumption of the current operator.
    pub fn if_deep(&mut self, step: StepRef) -> DeepMark {
        let mark = DeepMark(self.armed.len());
        let data_depth = self.data.len();
        self.armed.push(CodeFrame {
            step,
            seq: 0,
            data_depth,
        });
        mark
    }

    /// Arm the running step itself, resuming at `seq`.
    pub fn reenter_if_deep(&mut self, seq: usize) -> Outcome<DeepMark> {
        let step = self.current_step()?;
        let mark = self.if_deep(step);
        if let Some(frame) = self.armed.last_mut() {
            frame.seq = seq;
        }
        Ok(mark)
    }

    /// Push every armed resumption, outermost first.
    pub fn enter_deep(&mut self) {
        if !self.armed.is_empty() {
            self.code.append(&mut self.armed);
        }
    }

    /// Whether the resumption armed at `mark` was scheduled. Disarms it if
    /// it was not.
    pub fn went_deep(&mut self, mark: DeepMark) -> bool {
        if self.armed.len() > mark.0 {
            self.armed.truncate(mark.0);
            false
        } else {
            true
        }
    }

    pub(crate) fn disarm(&mut self) {
        debug_assert!(
            self.armed.is_empty(),
            "{} left {} resumption(s) armed",
            self.id,
            self.armed.len()
        );
        self.armed.clear();
    }

    // Suspension

    /// Suspend on `op`. The slice ends once the current step returns.
    pub fn idle(&mut self, op: Box<dyn BlockingOp>) -> Outcome {
        self.check_interrupted()?;
        if self.idle {
            return Err(access_error(format!(
                "{} is already idle on {}",
                self.id,
                self.pending.as_ref().map_or("a blocking operation", |op| op.name())
            )));
        }
        tracing::debug!(task = %self.id, op = op.name(), "idle");
        self.idle = true;
        self.pending = Some(op);
        self.yield_request = Some(Yield::Io);
        Ok(())
    }

    /// Leave the idle state. Fails if the task was interrupted meanwhile.
    pub fn unidle(&mut self) -> Outcome {
        self.idle = false;
        self.state = TaskState::Running;
        tracing::debug!(task = %self.id, "unidle");
        self.check_interrupted()
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Drop a pending operation during unwinding, keeping idle/unidle paired.
    pub(crate) fn abandon_idle(&mut self) {
        if self.idle {
            self.pending = None;
            self.in_flight.clear();
            self.idle = false;
            tracing::debug!(task = %self.id, "unidle (unwinding)");
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Request cooperative cancellation.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    pub fn set_interrupted(&self, interrupted: bool) {
        if interrupted {
            self.cancel.cancel();
        } else {
            self.cancel.reset();
        }
    }

    pub fn interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_interrupted(&self) -> Outcome {
        if self.interrupted() {
            Err(interrupted())
        } else {
            Ok(())
        }
    }

    // Termination

    pub(crate) fn complete(&mut self) {
        self.result = Some(self.data.pop().unwrap_or_default());
        self.data.clear();
        self.state = TaskState::Completed;
    }

    /// Record an unrecovered failure. The data stack is cut back to
    /// `data_depth`, the depth the failing step started from.
    pub(crate) fn fail(&mut self, failure: Failure, data_depth: usize) {
        self.data.truncate(data_depth);
        self.code.clear();
        self.current = None;
        self.failure = Some(failure);
        self.state = TaskState::Failed;
    }

    /// Report every value this context keeps alive.
    pub(crate) fn trace(&self, tracer: &mut Tracer) {
        tracer.values(&self.data);
        let frames = self
            .code
            .iter()
            .chain(self.armed.iter())
            .chain(self.current.iter());
        for frame in frames {
            frame.step.trace(tracer);
        }
        if let Some(result) = &self.result {
            tracer.value(result);
        }
        if let Some(op) = &self.pending {
            op.trace(tracer);
        }
        for &instance in &self.in_flight {
            tracer.instance(instance);
        }
    }
}

#[cfg(test)]
mod tests;
