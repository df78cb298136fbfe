//! Deterministic selection logic for tasks and interrupts.

use crate::core::types::Priority;

/// Stable sort by priority: equal priorities keep declaration order.
pub fn sort_by_priority<T>(items: &mut [T], priority: impl Fn(&T) -> Priority) {
    items.sort_by_key(|item| priority(item));
}

/// Find the first candidate whose guard holds, scanning in slice order.
///
/// Returns `None` if no candidate is applicable (the tick idles).
pub fn first_applicable<T>(
    candidates: &[T],
    mut applicable: impl FnMut(&T) -> bool,
) -> Option<usize> {
    candidates.iter().position(|candidate| applicable(candidate))
}
