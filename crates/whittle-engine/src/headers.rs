//! Header reduction with pattern-based policy and Cookie crumb handling.

use regex::Regex;
use whittle_core::{MinimizationConfig, ReductionState};

/// One header name pattern. Globs compile to anchored case-insensitive
/// regexes (`*` becomes `.*`); a pattern that fails to compile falls back
/// to exact case-insensitive name comparison.
pub enum HeaderPattern {
    Pattern(Regex),
    Exact(String),
}

impl HeaderPattern {
    pub fn compile(glob: &str) -> Self {
        let translated = format!("(?i)^{}$", glob.replace('*', ".*"));
        match Regex::new(&translated) {
            Ok(re) => Self::Pattern(re),
            Err(_) => Self::Exact(glob.to_ascii_lowercase()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(name),
            Self::Exact(exact) => *exact == name.to_ascii_lowercase(),
        }
    }
}

/// Compiled removal policy for one run.
pub struct HeaderPolicy {
    auto_removed: Vec<HeaderPattern>,
    keep: Vec<HeaderPattern>,
}

impl HeaderPolicy {
    pub fn from_config(cfg: &MinimizationConfig) -> Self {
        Self {
            auto_removed: cfg
                .auto_removed_headers
                .iter()
                .map(|p| HeaderPattern::compile(p))
                .collect(),
            keep: cfg
                .keep_headers
                .iter()
                .map(|p| HeaderPattern::compile(p))
                .collect(),
        }
    }

    /// Do-not-remove wins over auto-removed.
    pub fn keeps(&self, name: &str) -> bool {
        self.keep.iter().any(|p| p.matches(name))
    }

    pub fn auto_removes(&self, name: &str) -> bool {
        self.auto_removed.iter().any(|p| p.matches(name))
    }
}

/// Reduce the header set in original order.
///
/// Per header: do-not-remove patterns skip it untouched; auto-removed
/// patterns drop it without a network trial; the Cookie header gets
/// whole-header-then-per-crumb treatment; everything else is a single
/// removal trial committed on equivalence.
pub fn reduce_headers(
    state: &mut ReductionState,
    policy: &HeaderPolicy,
    check: &mut dyn FnMut(&ReductionState) -> bool,
) -> bool {
    let names: Vec<String> = state.headers.keys().cloned().collect();
    let mut changed = false;
    for name in &names {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        if policy.keeps(name) {
            continue;
        }
        if policy.auto_removes(name) {
            state.headers.shift_remove(name);
            changed = true;
            continue;
        }
        if name.eq_ignore_ascii_case("cookie") {
            changed |= reduce_cookie(state, name, check);
            continue;
        }
        let mut candidate = state.clone();
        candidate.headers.shift_remove(name);
        if check(&candidate) {
            *state = candidate;
            changed = true;
        }
    }
    changed
}

/// Cookie handling: try dropping the whole header first; if that breaks
/// equivalence, trial each `name=value` crumb in original order, committing
/// successes so later crumb trials see all prior removals.
fn reduce_cookie(
    state: &mut ReductionState,
    name: &str,
    check: &mut dyn FnMut(&ReductionState) -> bool,
) -> bool {
    let mut candidate = state.clone();
    candidate.headers.shift_remove(name);
    if check(&candidate) {
        *state = candidate;
        return true;
    }

    let raw = state
        .headers
        .get(name)
        .map(|values| values.join("; "))
        .unwrap_or_default();
    let crumbs: Vec<String> = raw
        .split(';')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let mut kept = crumbs.clone();
    let mut changed = false;
    for crumb in &crumbs {
        let Some(position) = kept.iter().position(|c| c == crumb) else {
            continue;
        };
        let mut trial_kept = kept.clone();
        trial_kept.remove(position);
        let mut candidate = state.clone();
        set_cookie_header(&mut candidate, name, &trial_kept);
        if check(&candidate) {
            *state = candidate;
            kept = trial_kept;
            changed = true;
        }
    }
    changed
}

fn set_cookie_header(state: &mut ReductionState, name: &str, crumbs: &[String]) {
    if crumbs.is_empty() {
        state.headers.shift_remove(name);
    } else {
        // Insert on an existing key keeps the header's original position.
        state
            .headers
            .insert(name.to_string(), vec![crumbs.join("; ")]);
    }
}
