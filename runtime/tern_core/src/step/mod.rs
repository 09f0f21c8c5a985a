//! Resumable units of work on the continuation stack.
//!
//! Syntax trees come from an external parser; what reaches the runtime is a
//! tree of [`Step`]s. This module carries the small set the core needs to
//! run, test and host such trees: literals, operator application, instance
//! creation, globals, branching, loops, and recovery points.
//!
//! Expression steps leave exactly one value on the data stack. [`While`] is
//! a statement and leaves the stack as it found it.

use std::sync::Arc;

use crate::errors::{access_error, type_mismatch, Failure, Outcome};
use crate::gc::Tracer;
use crate::handler::Operator;
use crate::value::Value;
use crate::vm::Vm;

/// Shared reference to a step.
pub type StepRef = Arc<dyn Step>;

pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the step. `seq` is 0 on first entry and whatever was passed to
    /// `reenter` on later entries.
    fn apply(&self, vm: &mut Vm<'_>, seq: usize) -> Outcome;

    /// Whether a failure unwinding past this frame stops here.
    fn is_recovery_point(&self, _seq: usize) -> bool {
        false
    }

    /// Handle a failure at a recovery point. The data stack has been cut back
    /// to its depth when this frame was pushed.
    fn recover(&self, _vm: &mut Vm<'_>, failure: Failure) -> Outcome {
        Err(failure)
    }

    /// Report values held by the step.
    fn trace(&self, _tracer: &mut Tracer) {}
}

/// Push a constant.
pub struct Push(pub Value);

impl Step for Push {
    fn name(&self) -> &'static str {
        "push"
    }

    fn apply(&self, vm: &mut Vm<'_>, _seq: usize) -> Outcome {
        vm.push(self.0.clone());
        Ok(())
    }

    fn trace(&self, tracer: &mut Tracer) {
        tracer.value(&self.0);
    }
}

/// Discard the top `n` values.
pub struct Pop(pub usize);

impl Step for Pop {
    fn name(&self) -> &'static str {
        "pop"
    }

    fn apply(&self, vm: &mut Vm<'_>, _seq: usize) -> Outcome {
        for _ in 0..self.0 {
            vm.pop()?;
        }
        Ok(())
    }
}

/// Run children in order.
pub struct Sequence(pub Vec<StepRef>);

impl Step for Sequence {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn apply(&self, vm: &mut Vm<'_>, seq: usize) -> Outcome {
        let Some(child) = self.0.get(seq) else {
            return Ok(());
        };
        if seq + 1 < self.0.len() {
            vm.reenter(seq + 1)?;
        }
        vm.push_step(Arc::clone(child));
        Ok(())
    }

    fn trace(&self, tracer: &mut Tracer) {
        for child in &self.0 {
            child.trace(tracer);
        }
    }
}

/// Invoke an operator on the values at the top of the stack.
pub struct Apply(pub Operator);

impl Step for Apply {
    fn name(&self) -> &'static str {
        "apply"
    }

    fn apply(&self, vm: &mut Vm<'_>, _seq: usize) -> Outcome {
        vm.invoke(&self.0).map(drop)
    }
}

/// Create an instance of a registered handler from `arg_count` arguments.
pub struct Create {
    pub handler: String,
    pub arg_count: usize,
}

impl Step for Create {
    fn name(&self) -> &'static str {
        "create"
    }

    fn apply(&self, vm: &mut Vm<'_>, _seq: usize) -> Outcome {
        let handler = vm
            .registry()
            .by_name(&self.handler)
            .ok_or_else(|| access_error(format!("no type handler named '{}'", self.handler)))?;
        vm.create(handler, self.arg_count).map(drop)
    }
}

/// Push a global.
pub struct LoadGlobal(pub String);

impl Step for LoadGlobal {
    fn name(&self) -> &'static str {
        "load_global"
    }

    fn apply(&self, vm: &mut Vm<'_>, _seq: usize) -> Outcome {
        let value = vm
            .global(&self.0)
            .cloned()
            .ok_or_else(|| access_error(format!("undefined global '{}'", self.0)))?;
        vm.push(value);
        Ok(())
    }
}

/// Assign the top of the stack to a global, leaving it in place.
pub struct StoreGlobal(pub String);

impl Step for StoreGlobal {
    fn name(&self) -> &'static str {
        "store_global"
    }

    fn apply(&self, vm: &mut Vm<'_>, _seq: usize) -> Outcome {
        let value = vm.top()?.assign();
        vm.set_global(self.0.clone(), value);
        Ok(())
    }
}

fn truth(value: &Value) -> Outcome<bool> {
    value
        .as_bool()
        .ok_or_else(|| type_mismatch("Boolean", value.type_name()))
}

/// Conditional expression. Without an else branch a false condition yields nil.
pub struct If {
    pub cond: StepRef,
    pub then: StepRef,
    pub otherwise: Option<StepRef>,
}

impl If {
    fn branch(&self, vm: &mut Vm<'_>) -> Outcome {
        let taken = truth(&vm.pop()?)?;
        match (taken, &self.otherwise) {
            (true, _) => vm.push_step(Arc::clone(&self.then)),
            (false, Some(otherwise)) => vm.push_step(Arc::clone(otherwise)),
            (false, None) => vm.push(Value::nil()),
        }
        Ok(())
    }
}

impl Step for If {
    fn name(&self) -> &'static str {
        "if"
    }

    fn apply(&self, vm: &mut Vm<'_>, seq: usize) -> Outcome {
        match seq {
            0 => {
                vm.reenter(1)?;
                vm.push_step(Arc::clone(&self.cond));
                Ok(())
            }
            1 => {
                let mark = vm.reenter_if_deep(2)?;
                vm.invoke(&Operator::IsTrue)?;
                if vm.went_deep(mark) {
                    return Ok(());
                }
                self.branch(vm)
            }
            _ => self.branch(vm),
        }
    }

    fn trace(&self, tracer: &mut Tracer) {
        self.cond.trace(tracer);
        self.then.trace(tracer);
        if let Some(otherwise) = &self.otherwise {
            otherwise.trace(tracer);
        }
    }
}

/// Loop statement. The body must leave the stack as it found it.
pub struct While {
    pub cond: StepRef,
    pub body: StepRef,
}

impl While {
    fn iterate(&self, vm: &mut Vm<'_>) -> Outcome {
        if truth(&vm.pop()?)? {
            vm.reenter(0)?;
            vm.push_step(Arc::clone(&self.body));
        }
        Ok(())
    }
}

impl Step for While {
    fn name(&self) -> &'static str {
        "while"
    }

    fn apply(&self, vm: &mut Vm<'_>, seq: usize) -> Outcome {
        match seq {
            0 => {
                vm.reenter(1)?;
                vm.push_step(Arc::clone(&self.cond));
                Ok(())
            }
            1 => {
                let mark = vm.reenter_if_deep(2)?;
                vm.invoke(&Operator::IsTrue)?;
                if vm.went_deep(mark) {
                    return Ok(());
                }
                self.iterate(vm)
            }
            _ => self.iterate(vm),
        }
    }

    fn trace(&self, tracer: &mut Tracer) {
        self.cond.trace(tracer);
        self.body.trace(tracer);
    }
}

/// Recovery point around `body`.
///
/// On failure the stack is cut back, the failure text is pushed as a string
/// and `catch` (if any) runs with it on top. Either way the step yields one
/// value.
pub struct Try {
    pub body: StepRef,
    pub catch: Option<StepRef>,
}

impl Step for Try {
    fn name(&self) -> &'static str {
        "try"
    }

    fn apply(&self, vm: &mut Vm<'_>, seq: usize) -> Outcome {
        if seq == 0 {
            vm.reenter(1)?;
            vm.push_step(Arc::clone(&self.body));
        }
        Ok(())
    }

    fn is_recovery_point(&self, seq: usize) -> bool {
        seq == 1
    }

    fn recover(&self, vm: &mut Vm<'_>, failure: Failure) -> Outcome {
        let text = vm.new_string(format!("{}: {failure}", failure.class()));
        vm.push(text);
        if let Some(catch) = &self.catch {
            vm.push_step(Arc::clone(catch));
        }
        Ok(())
    }

    fn trace(&self, tracer: &mut Tracer) {
        self.body.trace(tracer);
        if let Some(catch) = &self.catch {
            catch.trace(tracer);
        }
    }
}

/// A step backed by a closure, for handler continuations and host glue.
pub struct FnStep<F> {
    name: &'static str,
    body: F,
}

impl<F> Step for FnStep<F>
where
    F: Fn(&mut Vm<'_>, usize) -> Outcome + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, vm: &mut Vm<'_>, seq: usize) -> Outcome {
        (self.body)(vm, seq)
    }
}

// Constructors

pub fn push(value: impl Into<Value>) -> StepRef {
    Arc::new(Push(value.into()))
}

pub fn pop(count: usize) -> StepRef {
    Arc::new(Pop(count))
}

pub fn sequence(steps: impl IntoIterator<Item = StepRef>) -> StepRef {
    Arc::new(Sequence(steps.into_iter().collect()))
}

pub fn apply(op: Operator) -> StepRef {
    Arc::new(Apply(op))
}

pub fn call(arg_count: usize) -> StepRef {
    apply(Operator::Call(arg_count))
}

pub fn create(handler: impl Into<String>, arg_count: usize) -> StepRef {
    Arc::new(Create {
        handler: handler.into(),
        arg_count,
    })
}

pub fn load(name: impl Into<String>) -> StepRef {
    Arc::new(LoadGlobal(name.into()))
}

pub fn store(name: impl Into<String>) -> StepRef {
    Arc::new(StoreGlobal(name.into()))
}

pub fn if_else(cond: StepRef, then: StepRef, otherwise: Option<StepRef>) -> StepRef {
    Arc::new(If {
        cond,
        then,
        otherwise,
    })
}

pub fn while_loop(cond: StepRef, body: StepRef) -> StepRef {
    Arc::new(While { cond, body })
}

pub fn try_catch(body: StepRef, catch: Option<StepRef>) -> StepRef {
    Arc::new(Try { body, catch })
}

pub fn from_fn<F>(name: &'static str, body: F) -> StepRef
where
    F: Fn(&mut Vm<'_>, usize) -> Outcome + Send + Sync + 'static,
{
    Arc::new(FnStep { name, body })
}

#[cfg(test)]
mod tests;
