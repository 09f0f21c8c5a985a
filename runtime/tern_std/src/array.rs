//! The array type: a growable, shared vector of values.
//!
//! Arrays are reference types. Every value referring to one instance sees
//! element assignments and in-place appends made through any other.

use std::sync::Arc;

use tern_core::builtins::{len_value, resolve_index};
use tern_core::errors::{
    access_error, index_out_of_range, integer_overflow, param_error, result_too_large,
    stack_underflow, type_mismatch,
};
use tern_core::handler::{meta_property, META_PROPERTIES};
use tern_core::{
    Describer, HandlerInfo, HandlerRef, Heap, Instance, InstanceData, Outcome, Tracer, TypeHandler,
    TypeId, Value, Vm,
};

use crate::registered;

/// Instance data of an array.
pub type Elements = Vec<Value>;

pub struct ArrayHandler {
    info: HandlerInfo,
}

pub(crate) fn handler() -> HandlerRef {
    Arc::new(ArrayHandler {
        info: HandlerInfo::new("Array", Some(TypeId::ARRAY)),
    })
}

/// Store `elements` as a new array instance.
pub fn new_array(vm: &mut Vm<'_>, elements: Elements) -> Outcome<Value> {
    let handler = registered(vm, TypeId::ARRAY, "Array")?;
    Ok(vm.gc_store(&handler, elements))
}

/// Elements of `value` if it is an array.
pub fn elements<'v>(vm: &'v Vm<'_>, value: &Value) -> Option<&'v Elements> {
    let deep = value.as_deep()?;
    if deep.handler().info().type_id() != Some(TypeId::ARRAY) {
        return None;
    }
    vm.heap().get::<Elements>(deep.instance()).ok()
}

fn this(instance: Option<Instance>) -> Outcome<Instance> {
    instance.ok_or_else(|| access_error("array operator dispatched without an instance"))
}

fn index_of(value: &Value) -> Outcome<i64> {
    value
        .as_int()
        .ok_or_else(|| type_mismatch("Integer", value.type_name()))
}

impl TypeHandler for ArrayHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn create(&self, vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
        let depth = vm.depth();
        let start = depth
            .checked_sub(arg_count)
            .ok_or_else(|| stack_underflow(arg_count, depth))?;
        let elements: Elements = vm.data()[start..].iter().map(Value::assign).collect();
        let array = new_array(vm, elements)?;
        vm.stack_result(arg_count, array)
    }

    fn clone_instance(&self, heap: &Heap, instance: Instance) -> Outcome<InstanceData> {
        let copy: Elements = heap.get::<Elements>(instance)?.iter().map(Value::assign).collect();
        Ok(Box::new(copy))
    }

    /// Concatenate with another array, or append a single value.
    fn add(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, rhs] = vm.operands::<2>()?;
        let mut joined = vm.heap().get::<Elements>(instance)?.clone();
        match elements(vm, rhs) {
            Some(more) => joined.extend(more.iter().map(Value::assign)),
            None => joined.push(rhs.assign()),
        }
        let result = new_array(vm, joined)?;
        vm.stack_result(2, result)
    }

    fn aadd(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [target, rhs] = vm.operands::<2>()?;
        let appended: Elements = match elements(vm, rhs) {
            Some(more) => more.iter().map(Value::assign).collect(),
            None => vec![rhs.assign()],
        };
        let target = target.clone();
        vm.heap_mut()
            .get_mut::<Elements>(instance)?
            .extend(appended);
        vm.stack_result(2, target)
    }

    /// Repeat the elements `n` times.
    fn mul(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, count] = vm.operands::<2>()?;
        let count = usize::try_from(index_of(count)?)
            .map_err(|_| param_error("Array *", "a non-negative repeat count"))?;
        let items = vm.heap().get::<Elements>(instance)?;
        let mut repeated = Elements::new();
        if !items.is_empty() {
            let len = items
                .len()
                .checked_mul(count)
                .ok_or_else(|| integer_overflow("Array *"))?;
            repeated.try_reserve_exact(len).map_err(|_| result_too_large("Array *"))?;
            for _ in 0..count {
                repeated.extend(items.iter().map(Value::assign));
            }
        }
        let result = new_array(vm, repeated)?;
        vm.stack_result(2, result)
    }

    fn is_true(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let truth = !vm.heap().get::<Elements>(this(instance)?)?.is_empty();
        vm.stack_result(1, Value::boolean(truth))
    }

    /// Whether some element compares equal to the candidate.
    fn logical_in(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, candidate] = vm.operands::<2>()?;
        let found = vm
            .heap()
            .get::<Elements>(instance)?
            .iter()
            .any(|item| vm.compare(item, candidate).is_eq());
        vm.stack_result(2, Value::boolean(found))
    }

    fn get_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, index] = vm.operands::<2>()?;
        let index = index_of(index)?;
        let items = vm.heap().get::<Elements>(instance)?;
        let item = resolve_index(index, items.len())
            .map(|at| items[at].clone())
            .ok_or_else(|| index_out_of_range(index, items.len()))?;
        vm.stack_result(2, item)
    }

    fn set_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, index, value] = vm.operands::<3>()?;
        let index = index_of(index)?;
        let value = value.clone();
        let items = vm.heap_mut().get_mut::<Elements>(instance)?;
        let len = items.len();
        let at = resolve_index(index, len).ok_or_else(|| index_out_of_range(index, len))?;
        items[at] = value.assign();
        vm.stack_result(3, value)
    }

    fn get_property(&self, vm: &mut Vm<'_>, instance: Option<Instance>, name: &str) -> Outcome {
        if name == "len" {
            let len = vm.heap().get::<Elements>(this(instance)?)?.len();
            return vm.stack_result(1, len_value(len));
        }
        meta_property(vm, &self.info, name)
    }

    fn has_property(&self, _heap: &Heap, _instance: Option<Instance>, name: &str) -> bool {
        name == "len" || META_PROPERTIES.contains(&name)
    }

    fn enumerate_properties(
        &self,
        _heap: &Heap,
        _instance: Option<Instance>,
        each: &mut dyn FnMut(&str),
    ) {
        each("len");
        for name in META_PROPERTIES {
            each(name);
        }
    }

    /// Renders with the configured describe limits.
    fn to_string(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        let array = vm.top()?.clone();
        let text = vm.describe_default(&array);
        let result = vm.new_string(text);
        vm.stack_result(1, result)
    }

    fn mark(&self, heap: &Heap, instance: Instance, tracer: &mut Tracer) {
        if let Ok(items) = heap.get::<Elements>(instance) {
            tracer.values(items);
        }
    }

    fn describe(&self, out: &mut Describer<'_>, instance: Instance, depth: Option<usize>) {
        let Ok(items) = out.heap().get::<Elements>(instance) else {
            return;
        };
        out.write_str("[");
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.write_str(", ");
            }
            out.value(item, Describer::nested(depth));
        }
        out.write_str("]");
    }
}
