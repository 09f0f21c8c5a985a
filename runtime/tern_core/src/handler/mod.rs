//! The type handler protocol.
//!
//! One [`TypeHandler`] exists per logical type. It owns no instances; it is
//! the dispatcher every operator on a value of its type goes through.
//! Scalars dispatch through a fixed handler per scalar kind (with no
//! instance), deep values through the handler stored in the value.
//!
//! # Stack Convention
//!
//! Every operator reads its operands from the top of the task's data stack
//! and replaces them with exactly one result. The first (deepest) operand is
//! the value whose handler was selected. Arities are listed on [`Operator`].
//!
//! An operator that must call back into the interpreter does not recurse:
//! it schedules continuation steps and returns. The dispatcher notices the
//! grown continuation stack and defers result handling to those steps (see
//! [`Vm::invoke`]).
//!
//! # Failure
//!
//! Operators a handler does not implement fail with
//! [`FailureKind::UnsupportedOperation`](crate::errors::FailureKind). No
//! default silently does nothing.

mod registry;

use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::describe::Describer;
use crate::errors::{no_such_property, unsupported, Outcome};
use crate::gc::{Epoch, Heap, Instance, InstanceData, Tracer};
use crate::type_id::TypeId;
use crate::value::Value;
use crate::vm::Vm;

pub use registry::HandlerRegistry;

/// Shared reference to a registered handler.
pub type HandlerRef = Arc<dyn TypeHandler>;

/// Shared reference to a native function.
pub type FunctionRef = Arc<dyn NativeFunction>;

/// Identity of a handler plus its collector stamp.
#[derive(Debug)]
pub struct HandlerInfo {
    name: String,
    type_id: Option<TypeId>,
    last_mark: AtomicU64,
}

impl HandlerInfo {
    pub fn new(name: impl Into<String>, type_id: Option<TypeId>) -> Self {
        HandlerInfo {
            name: name.into(),
            type_id,
            last_mark: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Last epoch in which an instance of this type was marked.
    pub fn last_mark(&self) -> Epoch {
        Epoch::new(self.last_mark.load(AtomicOrdering::Relaxed))
    }

    pub(crate) fn stamp(&self, epoch: Epoch) {
        self.last_mark.fetch_max(epoch.raw(), AtomicOrdering::Relaxed);
    }
}

/// Operator families, with the number of stack operands each consumes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Inc,
    Dec,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    PowAssign,
    Compare,
    IsTrue,
    /// `container, candidate`: whether the container holds the candidate.
    In,
    /// `item, index`
    GetIndex,
    /// `item, index, value`; the result is the assigned value.
    SetIndex,
    /// `item`
    GetProperty(Arc<str>),
    /// `item, value`; the result is the assigned value.
    SetProperty(Arc<str>),
    /// `item`; the result is a boolean.
    Provides(Arc<str>),
    /// `callee, arg_1 .. arg_n`
    Call(usize),
    ToString,
}

impl Operator {
    /// Operands consumed from the data stack.
    pub fn arity(&self) -> usize {
        match self {
            Operator::Neg
            | Operator::Inc
            | Operator::Dec
            | Operator::IsTrue
            | Operator::GetProperty(_)
            | Operator::Provides(_)
            | Operator::ToString => 1,
            Operator::SetIndex => 3,
            Operator::Call(argc) => argc + 1,
            _ => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Add => "add",
            Operator::Sub => "sub",
            Operator::Mul => "mul",
            Operator::Div => "div",
            Operator::Mod => "mod",
            Operator::Pow => "pow",
            Operator::Neg => "neg",
            Operator::Inc => "inc",
            Operator::Dec => "dec",
            Operator::AddAssign => "aadd",
            Operator::SubAssign => "asub",
            Operator::MulAssign => "amul",
            Operator::DivAssign => "adiv",
            Operator::ModAssign => "amod",
            Operator::PowAssign => "apow",
            Operator::Compare => "compare",
            Operator::IsTrue => "is_true",
            Operator::In => "in",
            Operator::GetIndex => "get_index",
            Operator::SetIndex => "set_index",
            Operator::GetProperty(_) => "get_property",
            Operator::SetProperty(_) => "set_property",
            Operator::Provides(_) => "provides",
            Operator::Call(_) => "call",
            Operator::ToString => "to_string",
        }
    }

    pub fn get_property(name: &str) -> Self {
        Operator::GetProperty(Arc::from(name))
    }

    pub fn set_property(name: &str) -> Self {
        Operator::SetProperty(Arc::from(name))
    }

    pub fn provides(name: &str) -> Self {
        Operator::Provides(Arc::from(name))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::GetProperty(name) | Operator::SetProperty(name) | Operator::Provides(name) => {
                write!(f, "{}({name})", self.name())
            }
            Operator::Call(argc) => write!(f, "call({argc})"),
            _ => f.write_str(self.name()),
        }
    }
}

/// Behavior of one logical type.
///
/// `instance` is `None` when the operand is a scalar dispatched through the
/// scalar handler table.
#[allow(unused_variables, reason = "default bodies ignore most parameters")]
pub trait TypeHandler: Send + Sync {
    fn info(&self) -> &HandlerInfo;

    // Lifecycle

    /// Consume `arg_count` arguments and push exactly one new instance.
    fn create(&self, vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
        Err(unsupported(self.info().name(), "create"))
    }

    /// Flat copy of instance data.
    fn clone_instance(&self, heap: &Heap, instance: Instance) -> Outcome<InstanceData> {
        Err(unsupported(self.info().name(), "clone"))
    }

    /// Release instance data. Called exactly once per instance.
    fn dispose(&self, data: InstanceData) {
        drop(data);
    }

    fn serialize(&self, heap: &Heap, instance: Instance, out: &mut dyn Write) -> Outcome {
        Err(unsupported(self.info().name(), "serialize"))
    }

    fn deserialize(&self, input: &mut dyn Read) -> Outcome<InstanceData> {
        Err(unsupported(self.info().name(), "deserialize"))
    }

    // Arithmetic

    fn add(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "add"))
    }

    fn sub(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "sub"))
    }

    fn mul(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "mul"))
    }

    fn div(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "div"))
    }

    fn modulo(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "mod"))
    }

    fn pow(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "pow"))
    }

    fn neg(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "neg"))
    }

    fn inc(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "inc"))
    }

    fn dec(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "dec"))
    }

    // In-place variants. They produce a new value unless the type mutates
    // its instance.

    fn aadd(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        self.add(vm, instance)
    }

    fn asub(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        self.sub(vm, instance)
    }

    fn amul(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        self.mul(vm, instance)
    }

    fn adiv(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        self.div(vm, instance)
    }

    fn amod(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        self.modulo(vm, instance)
    }

    fn apow(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        self.pow(vm, instance)
    }

    // Relational and logical

    /// Push `-1`, `0` or `1`. Defaults to the residual total order.
    fn compare(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let [a, b] = vm.operands::<2>()?;
        let ordering = vm.compare(a, b);
        vm.stack_result(2, Value::int(ordering as i64))
    }

    fn is_true(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        vm.stack_result(1, Value::boolean(true))
    }

    fn logical_in(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "in"))
    }

    // Structure

    fn get_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "get_index"))
    }

    fn set_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        Err(unsupported(self.info().name(), "set_index"))
    }

    /// Every type answers `typeId` and `className`.
    fn get_property(&self, vm: &mut Vm<'_>, instance: Option<Instance>, name: &str) -> Outcome {
        meta_property(vm, self.info(), name)
    }

    fn set_property(&self, vm: &mut Vm<'_>, instance: Option<Instance>, name: &str) -> Outcome {
        Err(no_such_property(self.info().name(), name))
    }

    fn provides(&self, vm: &mut Vm<'_>, instance: Option<Instance>, name: &str) -> Outcome {
        let provided = self.has_property(vm.heap(), instance, name);
        vm.stack_result(1, Value::boolean(provided))
    }

    fn has_property(&self, heap: &Heap, instance: Option<Instance>, name: &str) -> bool {
        META_PROPERTIES.contains(&name)
    }

    fn enumerate_properties(
        &self,
        heap: &Heap,
        instance: Option<Instance>,
        each: &mut dyn FnMut(&str),
    ) {
        for name in META_PROPERTIES {
            each(name);
        }
    }

    /// Consume the callee and `arg_count` arguments, push one result.
    fn call(&self, vm: &mut Vm<'_>, instance: Option<Instance>, arg_count: usize) -> Outcome {
        Err(unsupported(self.info().name(), "call"))
    }

    /// Defaults to the one-level description as a string value.
    fn to_string(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let top = vm.top()?.clone();
        let text = vm.describe(&top, Some(1), None);
        let result = vm.new_string(text);
        vm.stack_result(1, result)
    }

    // Collector cooperation

    /// Push every instance reachable from `instance` into `tracer`.
    fn mark(&self, heap: &Heap, instance: Instance, tracer: &mut Tracer) {}

    /// Whether an instance stamped at `stamp` survives the pass at `epoch`.
    fn is_reachable(&self, stamp: Epoch, epoch: Epoch) -> bool {
        stamp >= epoch
    }

    // Ordering and description

    /// Order two instances of this type. `None` falls back to identity order.
    fn order(&self, heap: &Heap, a: Instance, b: Instance) -> Option<Ordering> {
        None
    }

    fn describe(&self, out: &mut Describer<'_>, instance: Instance, depth: Option<usize>) {
        out.write_str(self.info().name());
        out.write_str(" instance");
    }
}

/// Properties every handler answers.
pub const META_PROPERTIES: [&str; 2] = ["typeId", "className"];

/// Resolve one of [`META_PROPERTIES`] on the item at the top of the stack.
///
/// Handlers overriding `get_property` call this for names they do not own.
pub fn meta_property(vm: &mut Vm<'_>, info: &HandlerInfo, name: &str) -> Outcome {
    let result = match name {
        "typeId" => info
            .type_id()
            .map_or_else(Value::nil, |id| Value::int(i64::from(id.raw()))),
        "className" => vm.new_string(info.name()),
        _ => return Err(no_such_property(info.name(), name)),
    };
    vm.stack_result(1, result)
}

/// Route `op` to the matching handler method.
pub(crate) fn dispatch(
    handler: &dyn TypeHandler,
    vm: &mut Vm<'_>,
    op: &Operator,
    instance: Option<Instance>,
) -> Outcome {
    match op {
        Operator::Add => handler.add(vm, instance),
        Operator::Sub => handler.sub(vm, instance),
        Operator::Mul => handler.mul(vm, instance),
        Operator::Div => handler.div(vm, instance),
        Operator::Mod => handler.modulo(vm, instance),
        Operator::Pow => handler.pow(vm, instance),
        Operator::Neg => handler.neg(vm, instance),
        Operator::Inc => handler.inc(vm, instance),
        Operator::Dec => handler.dec(vm, instance),
        Operator::AddAssign => handler.aadd(vm, instance),
        Operator::SubAssign => handler.asub(vm, instance),
        Operator::MulAssign => handler.amul(vm, instance),
        Operator::DivAssign => handler.adiv(vm, instance),
        Operator::ModAssign => handler.amod(vm, instance),
        Operator::PowAssign => handler.apow(vm, instance),
        Operator::Compare => handler.compare(vm, instance),
        Operator::IsTrue => handler.is_true(vm, instance),
        Operator::In => handler.logical_in(vm, instance),
        Operator::GetIndex => handler.get_index(vm, instance),
        Operator::SetIndex => handler.set_index(vm, instance),
        Operator::GetProperty(name) => handler.get_property(vm, instance, name),
        Operator::SetProperty(name) => handler.set_property(vm, instance, name),
        Operator::Provides(name) => handler.provides(vm, instance, name),
        Operator::Call(argc) => handler.call(vm, instance, *argc),
        Operator::ToString => handler.to_string(vm, instance),
    }
}

/// A function implemented by the host.
///
/// Invoked through the function handler's `call` operator with the stack
/// holding `callee, arg_1 .. arg_n`; it must replace those slots with one
/// result, or go deep / idle and leave that to its continuation.
pub trait NativeFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Human readable parameter list, used in parameter errors.
    fn signature(&self) -> &str {
        "..."
    }

    fn invoke(&self, vm: &mut Vm<'_>, arg_count: usize) -> Outcome;
}

/// A [`NativeFunction`] built from a closure.
pub struct NativeFn<F> {
    name: String,
    signature: String,
    body: F,
}

/// Wrap a closure as a shared native function.
pub fn native_fn<F>(name: impl Into<String>, signature: impl Into<String>, body: F) -> FunctionRef
where
    F: Fn(&mut Vm<'_>, usize) -> Outcome + Send + Sync + 'static,
{
    Arc::new(NativeFn {
        name: name.into(),
        signature: signature.into(),
        body,
    })
}

impl<F> NativeFunction for NativeFn<F>
where
    F: Fn(&mut Vm<'_>, usize) -> Outcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &str {
        &self.signature
    }

    fn invoke(&self, vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
        (self.body)(vm, arg_count)
    }
}
