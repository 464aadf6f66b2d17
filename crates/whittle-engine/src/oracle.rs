//! Response equivalence oracle.
//!
//! Decides whether a trial response still counts as "the same behavior" as
//! the baseline. All rules are conjunctive and short-circuit on the first
//! mismatch. The single customization point for what "same" means.

use whittle_core::{ResponseSignature, content_type_is_json};

pub fn equivalent(original: &ResponseSignature, candidate: &ResponseSignature) -> bool {
    if original.status != candidate.status {
        return false;
    }
    if original.content_length != candidate.content_length {
        return false;
    }
    if original.content_type != candidate.content_type {
        return false;
    }
    let original_location = original.location.as_deref().unwrap_or("");
    let candidate_location = candidate.location.as_deref().unwrap_or("");
    if (!original_location.is_empty() || !candidate_location.is_empty())
        && original_location != candidate_location
    {
        return false;
    }
    if original.body_len != candidate.body_len {
        return false;
    }
    if let Some(ct) = original.content_type.as_deref()
        && content_type_is_json(ct)
    {
        // Both parsed: structural key-set compare, value differences are
        // fine. Either side unparseable: exact body equality.
        return match (&original.json_keys, &candidate.json_keys) {
            (Some(original_keys), Some(candidate_keys)) => original_keys == candidate_keys,
            _ => original.body_sha256 == candidate.body_sha256,
        };
    }
    true
}
