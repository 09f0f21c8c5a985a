//! Bounded textual rendering of values.
//!
//! Depth bounds nesting: a deep value reached with no depth left renders as
//! `...`. Length bounds each string leaf, which is cut and suffixed with
//! `...`. Containers are rendered at full width.
//!
//! Nested instances currently being rendered are tracked, so a reference
//! back into an enclosing container renders as `<cycle>` even when the depth
//! is unbounded.

use rustc_hash::FxHashSet;

use crate::gc::{Heap, Instance};
use crate::value::{Payload, Value};

/// Output buffer and bookkeeping for one describe call.
pub struct Describer<'h> {
    heap: &'h Heap,
    max_len: Option<usize>,
    out: String,
    active: FxHashSet<Instance>,
}

impl<'h> Describer<'h> {
    pub fn new(heap: &'h Heap, max_len: Option<usize>) -> Self {
        Describer {
            heap,
            max_len,
            out: String::new(),
            active: FxHashSet::default(),
        }
    }

    pub fn heap(&self) -> &'h Heap {
        self.heap
    }

    pub fn max_len(&self) -> Option<usize> {
        self.max_len
    }

    /// Depth available to the children of a value rendered at `depth`.
    #[inline]
    pub fn nested(depth: Option<usize>) -> Option<usize> {
        depth.map(|d| d.saturating_sub(1))
    }

    pub fn write_str(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Write a string leaf, cut to the length limit.
    pub fn write_truncated(&mut self, text: &str) {
        match self.max_len {
            Some(max) if text.chars().count() > max => {
                self.out.extend(text.chars().take(max));
                self.out.push_str("...");
            }
            _ => self.out.push_str(text),
        }
    }

    /// Render `value` with `depth` levels of nesting left.
    pub fn value(&mut self, value: &Value, depth: Option<usize>) {
        match value.payload() {
            Payload::Nil => self.out.push_str("Nil"),
            Payload::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Payload::Int(n) => self.out.push_str(&n.to_string()),
            Payload::Float(f) => self.out.push_str(&format_float(*f)),
            Payload::Function(func) => {
                self.out.push_str("Function ");
                self.out.push_str(func.name());
            }
            Payload::Deep(deep) => {
                if depth == Some(0) {
                    self.out.push_str("...");
                    return;
                }
                let instance = deep.instance();
                if !self.active.insert(instance) {
                    self.out.push_str("<cycle>");
                    return;
                }
                if self.heap.contains(instance) {
                    tern_stack::ensure_sufficient_stack(|| {
                        deep.handler().describe(self, instance, depth);
                    });
                } else {
                    self.out.push_str("<dead ");
                    self.out.push_str(deep.handler().info().name());
                    self.out.push('>');
                }
                self.active.remove(&instance);
            }
        }
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Floats always show a fractional part so they read differently from ints.
pub fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}
