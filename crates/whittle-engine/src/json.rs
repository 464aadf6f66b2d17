//! Structural delta-debugging for JSON bodies.
//!
//! Reduces a parsed JSON document to a minimal sub-structure whose whole
//! document still satisfies the caller's check. Containers are processed
//! with a two-phase algorithm: an elimination phase over the children (LIFO
//! worklist, commit-on-success), then recursion into each surviving
//! container child. Candidate documents are rebuilt through an explicit
//! path from the root, so no trial ever depends on hidden sibling state.
//!
//! Internal failures surface as `Err` and the caller keeps the body from
//! the previous stage: this pass is fail-safe, never fail-fatal.

use anyhow::{Result, anyhow};
use serde_json::Value;

#[derive(Debug, Clone)]
enum PathSeg {
    Key(String),
    Index(usize),
}

/// Reduce `body` as JSON. Returns `Ok(None)` when the body is not JSON,
/// the root is a primitive or an empty container, or no child could be
/// eliminated; in all of those cases the caller keeps its current body
/// bytes. Returns `Ok(Some(bytes))` only when at least one elimination
/// committed; the returned serialization is exactly the last candidate the
/// check accepted.
pub fn reduce_json(body: &[u8], check: &mut dyn FnMut(&[u8]) -> bool) -> Result<Option<Vec<u8>>> {
    let Ok(root) = serde_json::from_slice::<Value>(body) else {
        return Ok(None);
    };
    if !is_reducible(&root) {
        return Ok(None);
    }

    let mut doc = root;
    let mut eliminated = false;
    let mut doc_check = |candidate: &Value| -> Result<bool> {
        let bytes = serde_json::to_vec(candidate)?;
        Ok(check(&bytes))
    };
    reduce_at(&mut doc, &[], &mut doc_check, &mut eliminated)?;

    if !eliminated {
        return Ok(None);
    }
    Ok(Some(serde_json::to_vec(&doc)?))
}

fn is_reducible(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

/// Two-phase reduction of the container at `path` inside `doc`.
fn reduce_at(
    doc: &mut Value,
    path: &[PathSeg],
    check: &mut dyn FnMut(&Value) -> Result<bool>,
    eliminated: &mut bool,
) -> Result<()> {
    // Elimination phase. The worklist is popped LIFO, so the
    // most-recently-enumerated child is trialed first; array removals
    // therefore only ever happen at indices above the ones still pending,
    // which keeps pending indices stable.
    let mut worklist = child_keys(node_at(doc, path)?);
    let mut survivors: Vec<PathSeg> = Vec::new();
    let mut removed_indices: Vec<usize> = Vec::new();

    while let Some(child) = worklist.pop() {
        let node = node_at(doc, path)?;
        let candidate_node = remove_child(node, &child)?;
        let candidate_doc = splice(doc, path, candidate_node)?;
        if check(&candidate_doc)? {
            *doc = candidate_doc;
            *eliminated = true;
            if let PathSeg::Index(index) = child {
                removed_indices.push(index);
            }
        } else {
            survivors.push(child);
        }
    }

    // Recursion phase, in document order. Survivor indices were recorded
    // against the original array, so compact them past the eliminated gaps.
    survivors.reverse();
    for child in survivors {
        let current = compact_index(child, &removed_indices);
        let mut child_path = path.to_vec();
        child_path.push(current);
        if is_reducible(node_at(doc, &child_path)?) {
            reduce_at(doc, &child_path, check, eliminated)?;
        }
    }
    Ok(())
}

fn child_keys(node: &Value) -> Vec<PathSeg> {
    match node {
        Value::Object(map) => map.keys().cloned().map(PathSeg::Key).collect(),
        Value::Array(items) => (0..items.len()).map(PathSeg::Index).collect(),
        _ => Vec::new(),
    }
}

fn compact_index(child: PathSeg, removed: &[usize]) -> PathSeg {
    match child {
        PathSeg::Index(index) => {
            let shift = removed.iter().filter(|r| **r < index).count();
            PathSeg::Index(index - shift)
        }
        key => key,
    }
}

fn node_at<'v>(root: &'v Value, path: &[PathSeg]) -> Result<&'v Value> {
    let mut current = root;
    for seg in path {
        current = match (current, seg) {
            (Value::Object(map), PathSeg::Key(key)) => map
                .get(key)
                .ok_or_else(|| anyhow!("json path references missing key `{key}`"))?,
            (Value::Array(items), PathSeg::Index(index)) => items
                .get(*index)
                .ok_or_else(|| anyhow!("json path references missing index {index}"))?,
            _ => return Err(anyhow!("json path does not match document shape")),
        };
    }
    Ok(current)
}

/// Rebuild the document with the node at `path` replaced.
fn splice(root: &Value, path: &[PathSeg], replacement: Value) -> Result<Value> {
    let Some((seg, rest)) = path.split_first() else {
        return Ok(replacement);
    };
    match (root, seg) {
        (Value::Object(map), PathSeg::Key(key)) => {
            let child = map
                .get(key)
                .ok_or_else(|| anyhow!("json splice references missing key `{key}`"))?;
            let new_child = splice(child, rest, replacement)?;
            let mut map = map.clone();
            map.insert(key.clone(), new_child);
            Ok(Value::Object(map))
        }
        (Value::Array(items), PathSeg::Index(index)) => {
            let child = items
                .get(*index)
                .ok_or_else(|| anyhow!("json splice references missing index {index}"))?;
            let new_child = splice(child, rest, replacement)?;
            let mut items = items.clone();
            items[*index] = new_child;
            Ok(Value::Array(items))
        }
        _ => Err(anyhow!("json splice does not match document shape")),
    }
}

fn remove_child(node: &Value, child: &PathSeg) -> Result<Value> {
    match (node, child) {
        (Value::Object(map), PathSeg::Key(key)) => {
            let mut map = map.clone();
            map.remove(key);
            Ok(Value::Object(map))
        }
        (Value::Array(items), PathSeg::Index(index)) => {
            if *index >= items.len() {
                return Err(anyhow!("cannot remove index {index} past array end"));
            }
            let mut items = items.clone();
            items.remove(*index);
            Ok(Value::Array(items))
        }
        _ => Err(anyhow!("cannot remove a child from a scalar")),
    }
}
