//! The string type.
//!
//! Instance data is a plain `String`. Strings are mutable in place through
//! `+=`, so every value sharing the instance sees the appended text.

use std::cmp::Ordering;
use std::io::{Read, Write};

use super::{len_value, resolve_index};
use crate::describe::Describer;
use crate::errors::{
    access_error, index_out_of_range, integer_overflow, param_error, result_too_large,
    type_mismatch, Outcome,
};
use crate::gc::{Heap, Instance, InstanceData};
use crate::handler::{meta_property, HandlerInfo, TypeHandler, META_PROPERTIES};
use crate::type_id::TypeId;
use crate::value::Value;
use crate::vm::Vm;

pub struct StringHandler {
    info: HandlerInfo,
}

impl StringHandler {
    pub(crate) fn new() -> Self {
        StringHandler {
            info: HandlerInfo::new("String", Some(TypeId::STRING)),
        }
    }

    fn instance(instance: Option<Instance>) -> Outcome<Instance> {
        instance.ok_or_else(|| access_error("string operator dispatched without an instance"))
    }
}

impl TypeHandler for StringHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn create(&self, vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
        let text = match arg_count {
            0 => String::new(),
            1 => vm.display_text(vm.top()?),
            _ => return Err(param_error("String", "String([value])")),
        };
        let result = vm.new_string(text);
        vm.stack_result(arg_count, result)
    }

    fn clone_instance(&self, heap: &Heap, instance: Instance) -> Outcome<InstanceData> {
        Ok(Box::new(heap.get::<String>(instance)?.clone()))
    }

    fn serialize(&self, heap: &Heap, instance: Instance, out: &mut dyn Write) -> Outcome {
        bincode::serialize_into(out, heap.get::<String>(instance)?)?;
        Ok(())
    }

    fn deserialize(&self, input: &mut dyn Read) -> Outcome<InstanceData> {
        let text: String = bincode::deserialize_from(input)?;
        Ok(Box::new(text))
    }

    fn add(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = Self::instance(instance)?;
        let [_, rhs] = vm.operands::<2>()?;
        let suffix = vm.display_text(rhs);
        let mut text = vm.heap().get::<String>(instance)?.clone();
        text.push_str(&suffix);
        let result = vm.new_string(text);
        vm.stack_result(2, result)
    }

    fn aadd(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = Self::instance(instance)?;
        let [target, rhs] = vm.operands::<2>()?;
        let suffix = vm.display_text(rhs);
        let target = target.clone();
        vm.heap_mut().get_mut::<String>(instance)?.push_str(&suffix);
        vm.stack_result(2, target)
    }

    fn mul(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = Self::instance(instance)?;
        let [_, count] = vm.operands::<2>()?;
        let count = match count.as_int() {
            Some(n) => usize::try_from(n)
                .map_err(|_| param_error("String *", "a non-negative repeat count"))?,
            None => return Err(type_mismatch("Integer", count.type_name())),
        };
        let source = vm.heap().get::<String>(instance)?;
        let mut text = String::new();
        if !source.is_empty() {
            let len = source
                .len()
                .checked_mul(count)
                .ok_or_else(|| integer_overflow("String *"))?;
            text.try_reserve_exact(len).map_err(|_| result_too_large("String *"))?;
            for _ in 0..count {
                text.push_str(source);
            }
        }
        let result = vm.new_string(text);
        vm.stack_result(2, result)
    }

    fn is_true(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = Self::instance(instance)?;
        let truth = !vm.heap().get::<String>(instance)?.is_empty();
        vm.stack_result(1, Value::boolean(truth))
    }

    fn logical_in(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = Self::instance(instance)?;
        let [_, candidate] = vm.operands::<2>()?;
        let Some(needle) = vm.as_str(candidate) else {
            return Err(type_mismatch("String", candidate.type_name()));
        };
        let found = vm.heap().get::<String>(instance)?.contains(needle);
        vm.stack_result(2, Value::boolean(found))
    }

    fn get_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = Self::instance(instance)?;
        let [_, index] = vm.operands::<2>()?;
        let Some(index) = index.as_int() else {
            return Err(type_mismatch("Integer", index.type_name()));
        };
        let text = vm.heap().get::<String>(instance)?;
        let len = text.chars().count();
        let ch = resolve_index(index, len)
            .and_then(|at| text.chars().nth(at))
            .ok_or_else(|| index_out_of_range(index, len))?;
        let result = vm.new_string(ch.to_string());
        vm.stack_result(2, result)
    }

    fn get_property(&self, vm: &mut Vm<'_>, instance: Option<Instance>, name: &str) -> Outcome {
        if name == "len" {
            let instance = Self::instance(instance)?;
            let len = vm.heap().get::<String>(instance)?.chars().count();
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

    fn to_string(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        let this = vm.top()?.clone();
        vm.stack_result(1, this)
    }

    fn order(&self, heap: &Heap, a: Instance, b: Instance) -> Option<Ordering> {
        let a = heap.get::<String>(a).ok()?;
        let b = heap.get::<String>(b).ok()?;
        Some(a.cmp(b))
    }

    fn describe(&self, out: &mut Describer<'_>, instance: Instance, _depth: Option<usize>) {
        match out.heap().get::<String>(instance) {
            Ok(text) => {
                out.write_str("\"");
                out.write_truncated(text);
                out.write_str("\"");
            }
            Err(_) => out.write_str("<invalid string>"),
        }
    }
}
