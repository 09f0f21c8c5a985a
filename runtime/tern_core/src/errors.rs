//! Failure types raised by operators, steps and native functions.
//!
//! # Structured Failure Categories
//!
//! `FailureKind` is the typed category a host matches on; [`FailureClass`] is
//! its fieldless projection for cheap comparisons. Factory functions such as
//! [`division_by_zero`] are the public construction API.
//!
//! A [`Failure`] also records the names of the steps it unwound through,
//! innermost first, so a host can report where an unrecovered failure came
//! from without the runtime keeping a native backtrace.

use std::fmt;

use smallvec::SmallVec;

use crate::type_id::TypeId;

/// Result of an operator, step or native function.
pub type Outcome<T = ()> = Result<T, Failure>;

/// Typed failure category.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    /// Wrong argument count or kind at a native or handler boundary.
    #[error("invalid parameters for {function}; expected {signature}")]
    Param { function: String, signature: String },

    /// A handler does not implement the requested operator.
    #[error("operator '{op}' is not supported by {type_name}")]
    UnsupportedOperation { type_name: String, op: String },

    /// Index, key, property or instance not found.
    #[error("access error: {what}")]
    Access { what: String },

    /// Operand kind mismatch inside an operator.
    #[error("type error: expected {expected}, got {got}")]
    Type { expected: String, got: String },

    /// Division by zero or integer overflow.
    #[error("arithmetic error: {reason}")]
    Arithmetic { reason: String },

    /// A failed external resource or OS call.
    #[error("system error {code}: {message}")]
    System { code: i32, message: String },

    /// Cooperative cancellation observed at a yield point.
    #[error("interrupted")]
    Interrupted,
}

/// Fieldless projection of [`FailureKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Param,
    UnsupportedOperation,
    Access,
    Type,
    Arithmetic,
    System,
    Interrupted,
}

impl FailureClass {
    pub fn name(self) -> &'static str {
        match self {
            FailureClass::Param => "ParamError",
            FailureClass::UnsupportedOperation => "UnsupportedOperationError",
            FailureClass::Access => "AccessError",
            FailureClass::Type => "TypeError",
            FailureClass::Arithmetic => "ArithmeticError",
            FailureClass::System => "SystemError",
            FailureClass::Interrupted => "InterruptedError",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised failure together with the steps it unwound through.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct Failure {
    kind: FailureKind,
    unwound: SmallVec<[&'static str; 4]>,
}

impl Failure {
    pub fn new(kind: FailureKind) -> Self {
        Failure {
            kind,
            unwound: SmallVec::new(),
        }
    }

    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    pub fn class(&self) -> FailureClass {
        match self.kind {
            FailureKind::Param { .. } => FailureClass::Param,
            FailureKind::UnsupportedOperation { .. } => FailureClass::UnsupportedOperation,
            FailureKind::Access { .. } => FailureClass::Access,
            FailureKind::Type { .. } => FailureClass::Type,
            FailureKind::Arithmetic { .. } => FailureClass::Arithmetic,
            FailureKind::System { .. } => FailureClass::System,
            FailureKind::Interrupted => FailureClass::Interrupted,
        }
    }

    /// Step names unwound while propagating, innermost first.
    pub fn unwound(&self) -> &[&'static str] {
        &self.unwound
    }

    pub(crate) fn record_unwind(&mut self, step: &'static str) {
        self.unwound.push(step);
    }

    /// Native error code for `System` failures.
    pub fn system_code(&self) -> Option<i32> {
        match self.kind {
            FailureKind::System { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<FailureKind> for Failure {
    fn from(kind: FailureKind) -> Self {
        Failure::new(kind)
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            return interrupted();
        }
        system_error(err.raw_os_error().unwrap_or(-1), err.to_string())
    }
}

impl From<bincode::Error> for Failure {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io) => io.into(),
            other => system_error(-1, other.to_string()),
        }
    }
}

/// Failure to register a type handler.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a type handler named '{0}' is already registered")]
    DuplicateName(String),
    #[error("type id {0} is already taken by '{1}'")]
    DuplicateTypeId(TypeId, String),
}

// Factory functions

#[cold]
pub fn param_error(function: impl Into<String>, signature: impl Into<String>) -> Failure {
    FailureKind::Param {
        function: function.into(),
        signature: signature.into(),
    }
    .into()
}

#[cold]
pub fn unsupported(type_name: impl Into<String>, op: impl Into<String>) -> Failure {
    FailureKind::UnsupportedOperation {
        type_name: type_name.into(),
        op: op.into(),
    }
    .into()
}

#[cold]
pub fn access_error(what: impl Into<String>) -> Failure {
    FailureKind::Access { what: what.into() }.into()
}

#[cold]
pub fn index_out_of_range(index: i64, len: usize) -> Failure {
    access_error(format!("index {index} out of range for length {len}"))
}

#[cold]
pub fn key_not_found(key: impl fmt::Display) -> Failure {
    access_error(format!("key {key} not found"))
}

#[cold]
pub fn no_such_property(type_name: &str, property: &str) -> Failure {
    access_error(format!("{type_name} has no property '{property}'"))
}

#[cold]
pub fn stack_underflow(needed: usize, depth: usize) -> Failure {
    param_error(
        "operand fetch",
        format!("{needed} operands on the data stack, found {depth}"),
    )
}

#[cold]
pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Failure {
    FailureKind::Type {
        expected: expected.into(),
        got: got.into(),
    }
    .into()
}

#[cold]
pub fn division_by_zero() -> Failure {
    arithmetic("division by zero")
}

#[cold]
pub fn modulo_by_zero() -> Failure {
    arithmetic("modulo by zero")
}

#[cold]
pub fn integer_overflow(operation: &str) -> Failure {
    arithmetic(format!("integer overflow in {operation}"))
}

#[cold]
pub fn result_too_large(operation: &str) -> Failure {
    arithmetic(format!("result of {operation} is too large to allocate"))
}

fn arithmetic(reason: impl Into<String>) -> Failure {
    FailureKind::Arithmetic {
        reason: reason.into(),
    }
    .into()
}

#[cold]
pub fn system_error(code: i32, message: impl Into<String>) -> Failure {
    FailureKind::System {
        code,
        message: message.into(),
    }
    .into()
}

#[cold]
pub fn interrupted() -> Failure {
    FailureKind::Interrupted.into()
}
