//! Handlers and operations shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::builtins::resolve_index;
use crate::context::{BlockingOp, CancelToken};
use crate::describe::Describer;
use crate::errors::{index_out_of_range, interrupted, stack_underflow, Outcome};
use crate::gc::{Heap, Instance, InstanceData, Tracer};
use crate::handler::{HandlerInfo, HandlerRef, Operator, TypeHandler};
use crate::step;
use crate::type_id::TypeId;
use crate::value::Value;
use crate::vm::Vm;

/// A container of values that counts disposals.
pub(crate) struct NodeHandler {
    info: HandlerInfo,
    pub(crate) disposed: AtomicUsize,
}

pub(crate) fn node_handler() -> Arc<NodeHandler> {
    Arc::new(NodeHandler {
        info: HandlerInfo::new("Node", Some(TypeId::new(TypeId::FIRST_USER.raw() + 1))),
        disposed: AtomicUsize::new(0),
    })
}

impl NodeHandler {
    pub(crate) fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl TypeHandler for NodeHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn create(&self, vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
        let depth = vm.depth();
        let start = depth
            .checked_sub(arg_count)
            .ok_or_else(|| stack_underflow(arg_count, depth))?;
        let children: Vec<Value> = vm.data()[start..].to_vec();
        let handler = vm
            .registry()
            .by_name("Node")
            .cloned()
            .expect("node handler registered");
        let node = vm.gc_store(&handler, children);
        vm.stack_result(arg_count, node)
    }

    fn dispose(&self, data: InstanceData) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        drop(data);
    }

    fn get_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = instance.expect("node instance");
        let index = vm.top()?.int_value();
        let children = vm.heap().get::<Vec<Value>>(instance)?;
        let child = resolve_index(index, children.len())
            .map(|at| children[at].clone())
            .ok_or_else(|| index_out_of_range(index, children.len()))?;
        vm.stack_result(2, child)
    }

    fn set_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = instance.expect("node instance");
        let [_, index, value] = vm.operands::<3>()?;
        let (index, value) = (index.int_value(), value.clone());
        let children = vm.heap_mut().get_mut::<Vec<Value>>(instance)?;
        let len = children.len();
        let at = resolve_index(index, len).ok_or_else(|| index_out_of_range(index, len))?;
        children[at] = value.assign();
        vm.stack_result(3, value)
    }

    fn mark(&self, heap: &Heap, instance: Instance, tracer: &mut Tracer) {
        if let Ok(children) = heap.get::<Vec<Value>>(instance) {
            tracer.values(children);
        }
    }

    fn describe(&self, out: &mut Describer<'_>, instance: Instance, depth: Option<usize>) {
        let Ok(children) = out.heap().get::<Vec<Value>>(instance) else {
            return;
        };
        out.write_str("Node(");
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                out.write_str(", ");
            }
            out.value(child, Describer::nested(depth));
        }
        out.write_str(")");
    }
}

/// Wraps one value; `to_string` always goes deep to stringify it.
pub(crate) struct WrapperHandler {
    info: HandlerInfo,
}

pub(crate) fn wrapper_handler() -> HandlerRef {
    Arc::new(WrapperHandler {
        info: HandlerInfo::new("Wrapper", None),
    })
}

impl TypeHandler for WrapperHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn to_string(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let inner = vm
            .heap()
            .get::<Value>(instance.expect("wrapper instance"))?
            .clone();
        let mark = vm.if_deep(step::from_fn("wrapper_finish", |vm, _| {
            let text = vm.pop()?;
            vm.stack_result(1, text)
        }));
        vm.push_step(step::from_fn("wrapper_inner", move |vm, _| {
            vm.push(inner.clone());
            vm.invoke(&Operator::ToString).map(drop)
        }));
        assert!(vm.went_deep(mark));
        Ok(())
    }

    fn mark(&self, heap: &Heap, instance: Instance, tracer: &mut Tracer) {
        if let Ok(inner) = heap.get::<Value>(instance) {
            tracer.value(inner);
        }
    }
}

/// Blocks until cancelled or the timeout passes, then pushes `Int(1)` in
/// place of `callee, duration`.
pub(crate) struct WaitOp {
    pub(crate) timeout: Duration,
}

impl BlockingOp for WaitOp {
    fn name(&self) -> &str {
        "wait"
    }

    fn block(&mut self, cancel: &CancelToken) -> Outcome {
        if cancel.wait_timeout(self.timeout) {
            Err(interrupted())
        } else {
            Ok(())
        }
    }

    fn complete(self: Box<Self>, vm: &mut Vm<'_>) -> Outcome {
        vm.stack_result(2, Value::int(1))
    }
}

/// Holds a value until `gate` opens, then pushes it in place of the callee
/// and its arguments.
pub(crate) struct HoldOp {
    pub(crate) value: Value,
    pub(crate) gate: Receiver<()>,
    pub(crate) arg_count: usize,
}

impl BlockingOp for HoldOp {
    fn name(&self) -> &str {
        "hold"
    }

    fn block(&mut self, _cancel: &CancelToken) -> Outcome {
        self.gate
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| interrupted())
    }

    fn complete(self: Box<Self>, vm: &mut Vm<'_>) -> Outcome {
        vm.stack_result(self.arg_count + 1, self.value)
    }

    fn trace(&self, tracer: &mut Tracer) {
        tracer.value(&self.value);
    }
}
