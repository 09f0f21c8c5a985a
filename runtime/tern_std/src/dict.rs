//! The dictionary type: insertion-ordered key/value pairs.
//!
//! Keys hash by content for scalars and strings and by identity for every
//! other deep value, so `1` and `1.0` name the same entry (they compare
//! equal) while two distinct arrays never do.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tern_core::builtins::len_value;
use tern_core::errors::{
    access_error, key_not_found, param_error, stack_underflow, type_mismatch,
};
use tern_core::handler::{meta_property, META_PROPERTIES};
use tern_core::value::Payload;
use tern_core::{
    Describer, HandlerInfo, HandlerRef, Heap, Instance, InstanceData, Outcome, Tracer, TypeHandler,
    TypeId, Value, Vm,
};

use crate::registered;

/// Hashable identity of a dictionary key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DictKey {
    Nil,
    Bool(bool),
    Int(i64),
    /// Bits of a float with no exact integer value; every NaN shares one key.
    Float(u64),
    Text(String),
    Function(usize),
    Instance(Instance),
}

impl DictKey {
    pub fn of(vm: &Vm<'_>, value: &Value) -> DictKey {
        match value.payload() {
            Payload::Nil => DictKey::Nil,
            Payload::Bool(b) => DictKey::Bool(*b),
            Payload::Int(n) => DictKey::Int(*n),
            Payload::Float(f) => float_key(*f),
            Payload::Function(func) => DictKey::Function(Arc::as_ptr(func).cast::<()>() as usize),
            Payload::Deep(deep) => match vm.as_str(value) {
                Some(text) => DictKey::Text(text.to_owned()),
                None => DictKey::Instance(deep.instance()),
            },
        }
    }
}

fn float_key(f: f64) -> DictKey {
    // 2^63 is exact; every integral float in [-2^63, 2^63) fits an i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return DictKey::Float(f64::NAN.to_bits());
    }
    if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "integral and range checked above"
        )]
        return DictKey::Int(f as i64);
    }
    DictKey::Float(f.to_bits())
}

/// Instance data of a dictionary.
#[derive(Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: FxHashMap<DictKey, usize>,
}

impl Dict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.index.get(key).map(|&at| &self.entries[at].1)
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace. A replaced entry keeps its original position and key.
    pub fn insert(&mut self, id: DictKey, key: Value, value: Value) {
        match self.index.get(&id) {
            Some(&at) => self.entries[at].1 = value,
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    fn copy(&self) -> Dict {
        Dict {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.assign(), v.assign()))
                .collect(),
            index: self.index.clone(),
        }
    }
}

pub struct DictHandler {
    info: HandlerInfo,
}

pub(crate) fn handler() -> HandlerRef {
    Arc::new(DictHandler {
        info: HandlerInfo::new("Dictionary", Some(TypeId::DICT)),
    })
}

/// Store `dict` as a new dictionary instance.
pub fn new_dict(vm: &mut Vm<'_>, dict: Dict) -> Outcome<Value> {
    let handler = registered(vm, TypeId::DICT, "Dictionary")?;
    Ok(vm.gc_store(&handler, dict))
}

/// Contents of `value` if it is a dictionary.
pub fn dict<'v>(vm: &'v Vm<'_>, value: &Value) -> Option<&'v Dict> {
    let deep = value.as_deep()?;
    if deep.handler().info().type_id() != Some(TypeId::DICT) {
        return None;
    }
    vm.heap().get::<Dict>(deep.instance()).ok()
}

fn this(instance: Option<Instance>) -> Outcome<Instance> {
    instance.ok_or_else(|| access_error("dictionary operator dispatched without an instance"))
}

impl TypeHandler for DictHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    /// Arguments alternate key, value.
    fn create(&self, vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
        if arg_count % 2 != 0 {
            return Err(param_error("Dictionary", "Dictionary(key, value, ...)"));
        }
        let depth = vm.depth();
        let start = depth
            .checked_sub(arg_count)
            .ok_or_else(|| stack_underflow(arg_count, depth))?;
        let mut dict = Dict::default();
        for pair in vm.data()[start..].chunks_exact(2) {
            let id = DictKey::of(vm, &pair[0]);
            dict.insert(id, pair[0].assign(), pair[1].assign());
        }
        let result = new_dict(vm, dict)?;
        vm.stack_result(arg_count, result)
    }

    fn clone_instance(&self, heap: &Heap, instance: Instance) -> Outcome<InstanceData> {
        Ok(Box::new(heap.get::<Dict>(instance)?.copy()))
    }

    /// Merge into a new dictionary; entries of the right operand win.
    fn add(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, rhs] = vm.operands::<2>()?;
        let Some(other) = dict(vm, rhs) else {
            return Err(type_mismatch("Dictionary", rhs.type_name()));
        };
        let mut merged = vm.heap().get::<Dict>(instance)?.copy();
        for (key, value) in other.iter() {
            merged.insert(DictKey::of(vm, key), key.assign(), value.assign());
        }
        let result = new_dict(vm, merged)?;
        vm.stack_result(2, result)
    }

    fn is_true(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let truth = !vm.heap().get::<Dict>(this(instance)?)?.is_empty();
        vm.stack_result(1, Value::boolean(truth))
    }

    /// Whether the candidate is a key.
    fn logical_in(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, candidate] = vm.operands::<2>()?;
        let id = DictKey::of(vm, candidate);
        let found = vm.heap().get::<Dict>(instance)?.contains(&id);
        vm.stack_result(2, Value::boolean(found))
    }

    fn get_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, key] = vm.operands::<2>()?;
        let id = DictKey::of(vm, key);
        let found = vm.heap().get::<Dict>(instance)?.get(&id).cloned();
        match found {
            Some(value) => vm.stack_result(2, value),
            None => Err(key_not_found(vm.describe(key, Some(1), Some(20)))),
        }
    }

    fn set_index(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let instance = this(instance)?;
        let [_, key, value] = vm.operands::<3>()?;
        let id = DictKey::of(vm, key);
        let (key, value) = (key.assign(), value.clone());
        vm.heap_mut()
            .get_mut::<Dict>(instance)?
            .insert(id, key, value.assign());
        vm.stack_result(3, value)
    }

    fn get_property(&self, vm: &mut Vm<'_>, instance: Option<Instance>, name: &str) -> Outcome {
        if name == "len" {
            let len = vm.heap().get::<Dict>(this(instance)?)?.len();
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

    fn to_string(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let len = vm.heap().get::<Dict>(this(instance)?)?.len();
        let result = vm.new_string(format!("[Dictionary of {len} elements]"));
        vm.stack_result(1, result)
    }

    fn mark(&self, heap: &Heap, instance: Instance, tracer: &mut Tracer) {
        if let Ok(dict) = heap.get::<Dict>(instance) {
            for (key, value) in dict.iter() {
                tracer.value(key);
                tracer.value(value);
            }
        }
    }

    fn describe(&self, out: &mut Describer<'_>, instance: Instance, depth: Option<usize>) {
        let Ok(dict) = out.heap().get::<Dict>(instance) else {
            return;
        };
        let nested = Describer::nested(depth);
        out.write_str("[");
        for (i, (key, value)) in dict.iter().enumerate() {
            if i > 0 {
                out.write_str(", ");
            }
            out.value(key, nested);
            out.write_str(" => ");
            out.value(value, nested);
        }
        out.write_str("]");
    }
}
