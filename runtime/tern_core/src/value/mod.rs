//! The runtime value slot.
//!
//! A [`Value`] is a small tagged slot: either an inline scalar or a
//! reference to collector-owned instance data paired with the
//! [`TypeHandler`](crate::handler::TypeHandler) that interprets it.
//!
//! # Ownership
//!
//! Deep values never own their instance. The [`Heap`] owns every registered
//! instance; a value only carries an [`Instance`] handle, so any number of
//! values may refer to the same instance and observe each other's mutations.
//! Cloning a value copies the handle, not the data.
//!
//! # Flags
//!
//! Besides the payload each slot carries [`ValueFlags`]. The copy marker is
//! bookkeeping the interpreter sets on the source of an assignment; it lives
//! in an atomic byte so it can be set through a shared reference.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::describe::Describer;
use crate::gc::{Heap, Instance};
use crate::handler::{FunctionRef, HandlerRef};
use crate::type_id::TypeId;

bitflags! {
    /// Per-slot annotations orthogonal to the payload.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ValueFlags: u8 {
        /// The deep instance is tracked by the collector.
        const GARBAGE = 1 << 0;
        /// Meta-data marker for sequence protocols.
        const OUT_OF_BAND = 1 << 1;
        /// The slot has been the source of an assignment.
        const COPIED = 1 << 2;
    }
}

/// Discriminant of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Nil,
    Bool,
    Int64,
    Float64,
    NativeFunction,
    Deep,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "Nil",
            Kind::Bool => "Boolean",
            Kind::Int64 => "Integer",
            Kind::Float64 => "Numeric",
            Kind::NativeFunction => "Function",
            Kind::Deep => "Object",
        }
    }
}

/// A handler paired with a handle to the instance it interprets.
#[derive(Clone)]
pub struct DeepRef {
    handler: HandlerRef,
    instance: Instance,
}

impl DeepRef {
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// Identity: same handler object and same instance.
    pub fn same(&self, other: &DeepRef) -> bool {
        self.instance == other.instance && same_handler(&self.handler, &other.handler)
    }
}

impl fmt::Debug for DeepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:?}", self.handler.info().name(), self.instance)
    }
}

pub(crate) fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// The payload of a value slot. Only the field selected by the variant exists.
#[derive(Clone)]
pub enum Payload {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Function(FunctionRef),
    Deep(DeepRef),
}

/// A runtime value slot.
pub struct Value {
    payload: Payload,
    flags: AtomicU8,
}

impl Value {
    // Factory methods

    #[inline]
    pub fn nil() -> Self {
        Self::with_payload(Payload::Nil, ValueFlags::empty())
    }

    #[inline]
    pub fn boolean(b: bool) -> Self {
        Self::with_payload(Payload::Bool(b), ValueFlags::empty())
    }

    #[inline]
    pub fn int(n: i64) -> Self {
        Self::with_payload(Payload::Int(n), ValueFlags::empty())
    }

    #[inline]
    pub fn float(f: f64) -> Self {
        Self::with_payload(Payload::Float(f), ValueFlags::empty())
    }

    pub fn function(f: FunctionRef) -> Self {
        Self::with_payload(Payload::Function(f), ValueFlags::empty())
    }

    /// A deep value over a caller-owned (untracked) instance.
    pub fn deep(handler: HandlerRef, instance: Instance) -> Self {
        Self::with_payload(
            Payload::Deep(DeepRef { handler, instance }),
            ValueFlags::empty(),
        )
    }

    /// A deep value over a collector-tracked instance.
    pub fn tracked(handler: HandlerRef, instance: Instance) -> Self {
        Self::with_payload(
            Payload::Deep(DeepRef { handler, instance }),
            ValueFlags::GARBAGE,
        )
    }

    fn with_payload(payload: Payload, flags: ValueFlags) -> Self {
        Value {
            payload,
            flags: AtomicU8::new(flags.bits()),
        }
    }

    // Kind inspection

    pub fn kind(&self) -> Kind {
        match self.payload {
            Payload::Nil => Kind::Nil,
            Payload::Bool(_) => Kind::Bool,
            Payload::Int(_) => Kind::Int64,
            Payload::Float(_) => Kind::Float64,
            Payload::Function(_) => Kind::NativeFunction,
            Payload::Deep(_) => Kind::Deep,
        }
    }

    #[inline]
    pub fn is_kind(&self, kind: Kind) -> bool {
        self.kind() == kind
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self.payload, Payload::Nil)
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self.payload, Payload::Int(_) | Payload::Float(_))
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Type id of the value: fixed for scalars, the handler's for deep values.
    pub fn type_id(&self) -> Option<TypeId> {
        match &self.payload {
            Payload::Nil => Some(TypeId::NIL),
            Payload::Bool(_) => Some(TypeId::BOOL),
            Payload::Int(_) => Some(TypeId::INT),
            Payload::Float(_) => Some(TypeId::FLOAT),
            Payload::Function(_) => Some(TypeId::FUNCTION),
            Payload::Deep(deep) => deep.handler.info().type_id(),
        }
    }

    /// Name of the value's type, as used in failure messages.
    pub fn type_name(&self) -> &str {
        match &self.payload {
            Payload::Deep(deep) => deep.handler.info().name(),
            _ => self.kind().name(),
        }
    }

    // Checked accessors

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            Payload::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.payload {
            Payload::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Numeric view of an integer or float.
    #[expect(
        clippy::cast_precision_loss,
        reason = "numeric promotion of integers to floats"
    )]
    pub fn as_number(&self) -> Option<f64> {
        match self.payload {
            Payload::Int(n) => Some(n as f64),
            Payload::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match &self.payload {
            Payload::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_deep(&self) -> Option<&DeepRef> {
        match &self.payload {
            Payload::Deep(deep) => Some(deep),
            _ => None,
        }
    }

    /// Instance handle of a deep value.
    pub fn instance(&self) -> Option<Instance> {
        self.as_deep().map(DeepRef::instance)
    }

    // Trapping accessors. Reading the wrong kind is a programming error.

    #[track_caller]
    pub fn bool_value(&self) -> bool {
        match self.payload {
            Payload::Bool(b) => b,
            _ => wrong_kind(Kind::Bool, self.kind()),
        }
    }

    #[track_caller]
    pub fn int_value(&self) -> i64 {
        match self.payload {
            Payload::Int(n) => n,
            _ => wrong_kind(Kind::Int64, self.kind()),
        }
    }

    #[track_caller]
    pub fn float_value(&self) -> f64 {
        match self.payload {
            Payload::Float(f) => f,
            _ => wrong_kind(Kind::Float64, self.kind()),
        }
    }

    // Re-typing setters. Changing the payload resets every flag.

    pub fn set_nil(&mut self) {
        self.retype(Payload::Nil);
    }

    pub fn set_bool(&mut self, b: bool) {
        self.retype(Payload::Bool(b));
    }

    pub fn set_int(&mut self, n: i64) {
        self.retype(Payload::Int(n));
    }

    pub fn set_float(&mut self, f: f64) {
        self.retype(Payload::Float(f));
    }

    fn retype(&mut self, payload: Payload) {
        self.payload = payload;
        *self.flags.get_mut() = 0;
    }

    // Flags

    pub fn flags(&self) -> ValueFlags {
        ValueFlags::from_bits_truncate(self.flags.load(AtomicOrdering::Relaxed))
    }

    #[inline]
    pub fn is_garbage_tracked(&self) -> bool {
        self.flags().contains(ValueFlags::GARBAGE)
    }

    #[inline]
    pub fn is_out_of_band(&self) -> bool {
        self.flags().contains(ValueFlags::OUT_OF_BAND)
    }

    pub fn set_oob(&mut self) {
        *self.flags.get_mut() |= ValueFlags::OUT_OF_BAND.bits();
    }

    pub fn reset_oob(&mut self) {
        *self.flags.get_mut() &= !ValueFlags::OUT_OF_BAND.bits();
    }

    pub fn xor_oob(&mut self) {
        *self.flags.get_mut() ^= ValueFlags::OUT_OF_BAND.bits();
    }

    /// Builder form of [`Value::set_oob`].
    #[must_use]
    pub fn out_of_band(mut self) -> Self {
        self.set_oob();
        self
    }

    #[inline]
    pub fn is_copied(&self) -> bool {
        self.flags().contains(ValueFlags::COPIED)
    }

    /// Set the copy marker. Legal through a shared reference.
    pub fn mark_copied(&self) {
        self.flags
            .fetch_or(ValueFlags::COPIED.bits(), AtomicOrdering::Relaxed);
    }

    pub fn clear_copied(&self) {
        self.flags
            .fetch_and(!ValueFlags::COPIED.bits(), AtomicOrdering::Relaxed);
    }

    /// Duplicate for assignment: marks `self` as copied and returns the copy.
    ///
    /// `clone()` is the flat copy used for stack traffic and leaves the
    /// source untouched.
    #[must_use]
    pub fn assign(&self) -> Self {
        self.mark_copied();
        self.clone()
    }

    // Comparison

    /// Identity equality: scalars by value, functions and deep values by
    /// reference. Distinct from `compare(..) == Equal`.
    pub fn same_instance(&self, other: &Value) -> bool {
        match (&self.payload, &other.payload) {
            (Payload::Deep(a), Payload::Deep(b)) => a.same(b),
            (Payload::Function(a), Payload::Function(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => self == other,
        }
    }

    /// Total order over all values.
    ///
    /// Scalars order by kind rank (nil, boolean, number, function, object),
    /// numbers by exact numeric value with NaN above every number. Two deep
    /// values of one handler order through [`TypeHandler::order`], falling
    /// back to instance order; deep values of different handlers order by
    /// type id, then handler name.
    ///
    /// [`TypeHandler::order`]: crate::handler::TypeHandler::order
    pub fn compare(&self, other: &Value, heap: &Heap) -> Ordering {
        match (&self.payload, &other.payload) {
            (Payload::Nil, Payload::Nil) => Ordering::Equal,
            (Payload::Bool(a), Payload::Bool(b)) => a.cmp(b),
            (Payload::Int(a), Payload::Int(b)) => a.cmp(b),
            (Payload::Float(a), Payload::Float(b)) => compare_floats(*a, *b),
            (Payload::Int(a), Payload::Float(b)) => compare_int_float(*a, *b),
            (Payload::Float(a), Payload::Int(b)) => compare_int_float(*b, *a).reverse(),
            (Payload::Function(a), Payload::Function(b)) => {
                if std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)) {
                    Ordering::Equal
                } else {
                    a.name()
                        .cmp(b.name())
                        .then_with(|| Arc::as_ptr(a).cast::<()>().cmp(&Arc::as_ptr(b).cast::<()>()))
                }
            }
            (Payload::Deep(a), Payload::Deep(b)) => compare_deep(a, b, heap),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self.payload {
            Payload::Nil => 0,
            Payload::Bool(_) => 1,
            Payload::Int(_) | Payload::Float(_) => 2,
            Payload::Function(_) => 3,
            Payload::Deep(_) => 4,
        }
    }

    // Description

    /// Bounded textual rendering. `None` means unbounded.
    pub fn describe(&self, heap: &Heap, depth: Option<usize>, max_len: Option<usize>) -> String {
        let mut out = Describer::new(heap, max_len);
        out.value(self, depth);
        out.finish()
    }

    /// Alias of [`Value::describe`] used by string conversion paths.
    pub fn force_to_string(
        &self,
        heap: &Heap,
        depth: Option<usize>,
        max_len: Option<usize>,
    ) -> String {
        self.describe(heap, depth, max_len)
    }
}

fn compare_deep(a: &DeepRef, b: &DeepRef, heap: &Heap) -> Ordering {
    if same_handler(&a.handler, &b.handler) {
        if a.instance == b.instance {
            return Ordering::Equal;
        }
        return tern_stack::ensure_sufficient_stack(|| {
            a.handler.order(heap, a.instance, b.instance)
        })
        .unwrap_or_else(|| a.instance.cmp(&b.instance));
    }
    let (ia, ib) = (a.handler.info(), b.handler.info());
    ia.type_id()
        .cmp(&ib.type_id())
        .then_with(|| ia.name().cmp(ib.name()))
}

/// Float order with `-0.0 == 0.0` and every NaN equal and above all numbers.
fn compare_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer against a float.
#[expect(
    clippy::cast_possible_truncation,
    reason = "the float is range checked and truncated before the cast"
)]
fn compare_int_float(i: i64, f: f64) -> Ordering {
    // 2^63 is exactly representable; every finite float below it and at or
    // above -2^63 truncates to a valid i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() || f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => compare_floats(whole, f),
        unequal => unequal,
    }
}

#[cold]
#[track_caller]
fn wrong_kind(expected: Kind, got: Kind) -> ! {
    panic!("value accessor for {expected:?} used on a {got:?} value")
}

impl Clone for Value {
    /// Flat copy: the payload handle and the flags.
    fn clone(&self) -> Self {
        Value {
            payload: self.payload.clone(),
            flags: AtomicU8::new(self.flags.load(AtomicOrdering::Relaxed)),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::nil()
    }
}

/// Structural equality for scalars, identity for functions and deep values.
/// Flags are ignored.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (&self.payload, &other.payload) {
            (Payload::Nil, Payload::Nil) => true,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Payload::Function(a), Payload::Function(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Payload::Deep(a), Payload::Deep(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Nil => f.write_str("Nil"),
            Payload::Bool(b) => write!(f, "Bool({b})"),
            Payload::Int(n) => write!(f, "Int({n})"),
            Payload::Float(x) => write!(f, "Float({x:?})"),
            Payload::Function(func) => write!(f, "Function({})", func.name()),
            Payload::Deep(deep) => write!(f, "Deep({deep:?})"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::float(f)
    }
}

impl From<FunctionRef> for Value {
    fn from(f: FunctionRef) -> Self {
        Value::function(f)
    }
}
