pub mod merge;
pub mod subst;

use serde_yaml::Value;

/// Keep the first occurrence of each element, preserving input order.
pub fn uniquify<T: Clone + PartialEq>(seq: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(seq.len());
    for item in seq {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Split every entry of `list` on commas, flattening the result.
pub fn split_commas(list: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for entry in list {
        for part in entry.split(',') {
            if !part.is_empty() {
                out.push(part.to_string());
            }
        }
    }
    out
}

/// Absent or null becomes `[]`, a sequence stays as-is, any other value
/// becomes a one-element list.
pub fn listify(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(seq)) => seq.clone(),
        Some(other) => vec![other.clone()],
    }
}

/// Like [`listify`], but every element must be a string scalar.
pub fn listify_strings(value: Option<&Value>) -> Option<Vec<String>> {
    let mut out = Vec::new();
    for entry in listify(value) {
        match entry {
            Value::String(s) => out.push(s),
            _ => return None,
        }
    }
    Some(out)
}
