//! Lookup tables from names, type ids and scalar kinds to handlers.

use rustc_hash::FxHashMap;

use super::HandlerRef;
use crate::builtins;
use crate::errors::RegistryError;
use crate::gc::Instance;
use crate::type_id::TypeId;
use crate::value::{Kind, Payload, Value};

/// Registered handlers. Read-only while tasks run.
pub struct HandlerRegistry {
    by_name: FxHashMap<String, HandlerRef>,
    by_type: FxHashMap<TypeId, HandlerRef>,
    nil: HandlerRef,
    boolean: HandlerRef,
    int: HandlerRef,
    float: HandlerRef,
    function: HandlerRef,
    string: HandlerRef,
}

impl HandlerRegistry {
    /// A registry holding the scalar handlers and the string handler.
    pub fn new() -> Self {
        let mut registry = HandlerRegistry {
            by_name: FxHashMap::default(),
            by_type: FxHashMap::default(),
            nil: builtins::nil_handler(),
            boolean: builtins::bool_handler(),
            int: builtins::int_handler(),
            float: builtins::float_handler(),
            function: builtins::function_handler(),
            string: builtins::string_handler(),
        };
        let core = [
            registry.nil.clone(),
            registry.boolean.clone(),
            registry.int.clone(),
            registry.float.clone(),
            registry.function.clone(),
            registry.string.clone(),
        ];
        for handler in core {
            registry.index(handler);
        }
        registry
    }

    /// Publish a handler under its name and type id.
    pub fn register(&mut self, handler: HandlerRef) -> Result<HandlerRef, RegistryError> {
        let info = handler.info();
        if self.by_name.contains_key(info.name()) {
            return Err(RegistryError::DuplicateName(info.name().to_owned()));
        }
        if let Some(id) = info.type_id() {
            if let Some(existing) = self.by_type.get(&id) {
                return Err(RegistryError::DuplicateTypeId(
                    id,
                    existing.info().name().to_owned(),
                ));
            }
        }
        tracing::debug!(name = info.name(), type_id = ?info.type_id(), "registered type handler");
        self.index(handler.clone());
        Ok(handler)
    }

    fn index(&mut self, handler: HandlerRef) {
        if let Some(id) = handler.info().type_id() {
            self.by_type.insert(id, handler.clone());
        }
        self.by_name.insert(handler.info().name().to_owned(), handler);
    }

    pub fn by_name(&self, name: &str) -> Option<&HandlerRef> {
        self.by_name.get(name)
    }

    pub fn by_type(&self, id: TypeId) -> Option<&HandlerRef> {
        self.by_type.get(&id)
    }

    /// Fixed handler of a scalar kind; `None` for deep values.
    pub fn scalar(&self, kind: Kind) -> Option<&HandlerRef> {
        match kind {
            Kind::Nil => Some(&self.nil),
            Kind::Bool => Some(&self.boolean),
            Kind::Int64 => Some(&self.int),
            Kind::Float64 => Some(&self.float),
            Kind::NativeFunction => Some(&self.function),
            Kind::Deep => None,
        }
    }

    pub fn string_handler(&self) -> &HandlerRef {
        &self.string
    }

    /// Handler and instance an operator on `value` dispatches to.
    pub fn resolve(&self, value: &Value) -> (HandlerRef, Option<Instance>) {
        let handler = match value.payload() {
            Payload::Deep(deep) => return (deep.handler().clone(), Some(deep.instance())),
            Payload::Nil => &self.nil,
            Payload::Bool(_) => &self.boolean,
            Payload::Int(_) => &self.int,
            Payload::Float(_) => &self.float,
            Payload::Function(_) => &self.function,
        };
        (handler.clone(), None)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
