//! URL-encoded form body reduction.

use whittle_core::{BodyState, ReductionState};

/// Same single-pass elimination as the query reducer, over form field keys.
///
/// The orchestrator only calls this when the captured content type is
/// `application/x-www-form-urlencoded` and the current body parsed into
/// fields; the body stays in [`BodyState::Form`] so synthesis re-encodes
/// the surviving fields on every trial.
pub fn reduce_form(
    state: &mut ReductionState,
    check: &mut dyn FnMut(&ReductionState) -> bool,
) -> bool {
    let keys: Vec<String> = match &state.body {
        Some(BodyState::Form(fields)) => fields.keys().cloned().collect(),
        _ => return false,
    };
    let mut changed = false;
    for key in &keys {
        let mut candidate = state.clone();
        if let Some(BodyState::Form(fields)) = &mut candidate.body {
            fields.shift_remove(key);
        }
        if check(&candidate) {
            *state = candidate;
            changed = true;
        }
    }
    changed
}
