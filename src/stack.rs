//! Stack growth for the recursive passes.
//!
//! Parsing, resolving, printing and evaluating all recurse once per nesting
//! level of the program. Each of them wraps its recursive entry point in
//! [`ensure_sufficient_stack`], so deep programs run on a heap-allocated
//! stack segment instead of overflowing the thread's native stack.

/// Grow when less than this much stack is left.
const RED_ZONE: usize = 100 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
