//! Stack growth guard for the runtime's recursive paths.
//!
//! The interpreter itself never recurses on the native stack: operators that
//! need to call back into it schedule continuations instead. Rendering a
//! value with an unbounded describe depth still recurses, because it walks
//! nested data rather than code. It wraps each level in
//! [`ensure_sufficient_stack`], which grows the stack on demand instead of
//! overflowing on deeply nested data. Host-side comparisons that reach a
//! handler's `order` hook are wrapped the same way.
//!
//! # Platform Support
//!
//! - **Native targets**: Uses the `stacker` crate to grow the stack on demand.
//! - **WASM targets**: No-op passthrough (WASM has its own stack management).

/// Remaining stack below which a new segment is allocated (64KB).
const RED_ZONE: usize = 64 * 1024;

/// Size of each newly allocated stack segment (1MB).
const SEGMENT_SIZE: usize = 1024 * 1024;

/// Run `f`, first growing the stack if less than the red zone remains.
///
/// ```text
/// fn depth_of(&self, value: &Value) -> usize {
///     ensure_sufficient_stack(|| match value.children() {
///         [] => 0,
///         children => 1 + children.iter().map(|c| self.depth_of(c)).max().unwrap_or(0),
///     })
/// }
/// ```
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}

/// WASM version: calls `f` directly.
#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
