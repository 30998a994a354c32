use std::collections::HashMap;

use indexmap::IndexMap;
use serde_yaml::Value;

/// Substitute `${name}` placeholders in `input` with values from `table`.
/// Unknown placeholders are left untouched.
pub fn substitute(input: &str, table: &HashMap<String, String>) -> String {
    let mut result = input.to_string();
    for (key, value) in table {
        let pattern = format!("${{{}}}", key);
        result = result.replace(&pattern, value);
    }
    result
}

/// Rewrite every string leaf of `value` by applying each `table` entry as a
/// literal substring replacement. Mapping keys are not rewritten.
///
/// Tokens are raw substrings: a token `x` also rewrites the `x` inside
/// `example`. Template authors are expected to pick collision-free tokens.
pub fn deep_replace(value: &mut Value, table: &IndexMap<String, String>) {
    match value {
        Value::String(s) => {
            for (token, replacement) in table {
                if s.contains(token.as_str()) {
                    *s = s.replace(token.as_str(), replacement);
                }
            }
        }
        Value::Sequence(seq) => {
            for entry in seq {
                deep_replace(entry, table);
            }
        }
        Value::Mapping(map) => {
            for (_, entry) in map.iter_mut() {
                deep_replace(entry, table);
            }
        }
        _ => {}
    }
}

/// Yield every Cartesian combination of a key → list-of-values table as
/// one key → value mapping per combination. The last key varies fastest.
pub fn dict_list_product(table: &IndexMap<String, Vec<String>>) -> Vec<IndexMap<String, String>> {
    let mut combos: Vec<IndexMap<String, String>> = vec![IndexMap::new()];
    for (key, values) in table {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut expanded = combo.clone();
                expanded.insert(key.clone(), value.clone());
                next.push(expanded);
            }
        }
        combos = next;
    }
    combos
}
