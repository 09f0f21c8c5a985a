//! Handlers of the built-in types.
//!
//! Scalars (nil, boolean, integer, float, native function) dispatch through
//! these handlers with no instance. Strings are the one deep type the core
//! needs itself, for `to_string` results and `className`.
//!
//! Integer arithmetic is checked: overflow is an arithmetic failure, not a
//! wrap. Mixing an integer with a float promotes to float, and an integer
//! division that does not divide exactly yields a float.

mod string;

use std::sync::Arc;

use crate::errors::{
    division_by_zero, integer_overflow, modulo_by_zero, type_mismatch, Outcome,
};
use crate::gc::Instance;
use crate::handler::{HandlerInfo, HandlerRef, TypeHandler};
use crate::type_id::TypeId;
use crate::value::{Payload, Value};
use crate::vm::Vm;

pub use string::StringHandler;

pub(crate) fn nil_handler() -> HandlerRef {
    Arc::new(NilHandler {
        info: HandlerInfo::new("Nil", Some(TypeId::NIL)),
    })
}

pub(crate) fn bool_handler() -> HandlerRef {
    Arc::new(BoolHandler {
        info: HandlerInfo::new("Boolean", Some(TypeId::BOOL)),
    })
}

pub(crate) fn int_handler() -> HandlerRef {
    Arc::new(NumberHandler {
        info: HandlerInfo::new("Integer", Some(TypeId::INT)),
    })
}

pub(crate) fn float_handler() -> HandlerRef {
    Arc::new(NumberHandler {
        info: HandlerInfo::new("Numeric", Some(TypeId::FLOAT)),
    })
}

pub(crate) fn function_handler() -> HandlerRef {
    Arc::new(FunctionHandler {
        info: HandlerInfo::new("Function", Some(TypeId::FUNCTION)),
    })
}

pub(crate) fn string_handler() -> HandlerRef {
    Arc::new(StringHandler::new())
}

/// Map a possibly negative index onto `0..len`.
pub fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 {
        index.checked_add(len)?
    } else {
        index
    };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

/// Length as a runtime integer.
pub fn len_value(len: usize) -> Value {
    Value::int(i64::try_from(len).unwrap_or(i64::MAX))
}

struct NilHandler {
    info: HandlerInfo,
}

impl TypeHandler for NilHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn is_true(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        vm.stack_result(1, Value::boolean(false))
    }
}

struct BoolHandler {
    info: HandlerInfo,
}

impl TypeHandler for BoolHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn is_true(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        let truth = vm.top()?.as_bool().unwrap_or(false);
        vm.stack_result(1, Value::boolean(truth))
    }
}

struct FunctionHandler {
    info: HandlerInfo,
}

impl TypeHandler for FunctionHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn call(&self, vm: &mut Vm<'_>, _instance: Option<Instance>, arg_count: usize) -> Outcome {
        let callee = vm.callee(arg_count)?;
        let function = callee
            .as_function()
            .cloned()
            .ok_or_else(|| type_mismatch("Function", callee.type_name()))?;
        tracing::trace!(function = function.name(), arg_count, "native call");
        function.invoke(vm, arg_count)
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Number> {
        match value.payload() {
            Payload::Int(n) => Some(Number::Int(*n)),
            Payload::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "numeric promotion of integers to floats"
    )]
    fn to_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }
}

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl Arith {
    fn name(self) -> &'static str {
        match self {
            Arith::Add => "addition",
            Arith::Sub => "subtraction",
            Arith::Mul => "multiplication",
            Arith::Div => "division",
            Arith::Mod => "modulo",
            Arith::Pow => "power",
        }
    }
}

fn arith(op: Arith, a: Number, b: Number) -> Outcome<Value> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => int_arith(op, x, y),
        _ => float_arith(op, a.to_f64(), b.to_f64()),
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "inexact quotients and negative powers promote to float"
)]
fn int_arith(op: Arith, x: i64, y: i64) -> Outcome<Value> {
    let checked = match op {
        Arith::Add => x.checked_add(y),
        Arith::Sub => x.checked_sub(y),
        Arith::Mul => x.checked_mul(y),
        Arith::Div => {
            if y == 0 {
                return Err(division_by_zero());
            }
            match x.checked_rem(y) {
                Some(0) => x.checked_div(y),
                Some(_) => return Ok(Value::float(x as f64 / y as f64)),
                None => None,
            }
        }
        Arith::Mod => {
            if y == 0 {
                return Err(modulo_by_zero());
            }
            x.checked_rem(y)
        }
        Arith::Pow => {
            if y < 0 {
                return Ok(Value::float((x as f64).powf(y as f64)));
            }
            u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp))
        }
    };
    checked
        .map(Value::int)
        .ok_or_else(|| integer_overflow(op.name()))
}

fn float_arith(op: Arith, x: f64, y: f64) -> Outcome<Value> {
    let result = match op {
        Arith::Add => x + y,
        Arith::Sub => x - y,
        Arith::Mul => x * y,
        Arith::Div => {
            if y == 0.0 {
                return Err(division_by_zero());
            }
            x / y
        }
        Arith::Mod => {
            if y == 0.0 {
                return Err(modulo_by_zero());
            }
            x % y
        }
        Arith::Pow => x.powf(y),
    };
    Ok(Value::float(result))
}

/// Integers and floats share one handler type under two names.
struct NumberHandler {
    info: HandlerInfo,
}

impl NumberHandler {
    fn binary(vm: &mut Vm<'_>, op: Arith) -> Outcome {
        let [a, b] = vm.operands::<2>()?;
        let result = match (Number::of(a), Number::of(b)) {
            (Some(x), Some(y)) => arith(op, x, y)?,
            (None, _) => return Err(type_mismatch("number", a.type_name())),
            (_, None) => return Err(type_mismatch("number", b.type_name())),
        };
        vm.stack_result(2, result)
    }

    fn step(vm: &mut Vm<'_>, delta: i64) -> Outcome {
        let operand = vm.top()?;
        let result = match Number::of(operand) {
            Some(Number::Int(n)) => n
                .checked_add(delta)
                .map(Value::int)
                .ok_or_else(|| integer_overflow("increment"))?,
            #[expect(clippy::cast_precision_loss, reason = "delta is one")]
            Some(Number::Float(f)) => Value::float(f + delta as f64),
            None => return Err(type_mismatch("number", operand.type_name())),
        };
        vm.stack_result(1, result)
    }
}

impl TypeHandler for NumberHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn add(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::binary(vm, Arith::Add)
    }

    fn sub(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::binary(vm, Arith::Sub)
    }

    fn mul(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::binary(vm, Arith::Mul)
    }

    fn div(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::binary(vm, Arith::Div)
    }

    fn modulo(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::binary(vm, Arith::Mod)
    }

    fn pow(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::binary(vm, Arith::Pow)
    }

    fn neg(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        let operand = vm.top()?;
        let result = match Number::of(operand) {
            Some(Number::Int(n)) => n
                .checked_neg()
                .map(Value::int)
                .ok_or_else(|| integer_overflow("negation"))?,
            Some(Number::Float(f)) => Value::float(-f),
            None => return Err(type_mismatch("number", operand.type_name())),
        };
        vm.stack_result(1, result)
    }

    fn inc(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::step(vm, 1)
    }

    fn dec(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        Self::step(vm, -1)
    }

    fn is_true(&self, vm: &mut Vm<'_>, _instance: Option<Instance>) -> Outcome {
        let truth = match Number::of(vm.top()?) {
            Some(Number::Int(n)) => n != 0,
            Some(Number::Float(f)) => f != 0.0,
            None => false,
        };
        vm.stack_result(1, Value::boolean(truth))
    }
}
