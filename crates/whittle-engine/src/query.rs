//! Query parameter reduction.

use whittle_core::ReductionState;

/// Single forward pass over the distinct query keys in first-seen order.
///
/// Each trial is the currently committed minimal set minus one key; a
/// successful trial commits the removal for all subsequent trials. Keys
/// are tested exactly once; a key kept early is never reconsidered, even
/// if a later removal would have freed it.
pub fn reduce_query(
    state: &mut ReductionState,
    check: &mut dyn FnMut(&ReductionState) -> bool,
) -> bool {
    let keys: Vec<String> = state.query.keys().cloned().collect();
    let mut changed = false;
    for key in &keys {
        let mut candidate = state.clone();
        candidate.query.shift_remove(key);
        if check(&candidate) {
            *state = candidate;
            changed = true;
        }
    }
    changed
}
