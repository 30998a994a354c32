use serde_yaml::{Mapping, Value};

use crate::error::{LazeError, Result};
use crate::util::uniquify;

/// Options controlling [`deep_merge`] behavior.
///
/// `override_values` lets the right-hand side win on conflicting scalar
/// leaves instead of failing. `change_listorder` prepends right-hand list
/// entries instead of appending. `only_existing` skips keys absent from the
/// left-hand side. `join_lists` promotes a scalar to a one-element list when
/// the other side is a list.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOpts {
    pub override_values: bool,
    pub change_listorder: bool,
    pub only_existing: bool,
    pub join_lists: bool,
}

/// Merge mapping `b` into mapping `a`, recursing key-wise.
pub fn deep_merge(a: &mut Mapping, b: &Mapping, opts: MergeOpts) -> Result<()> {
    merge_mapping(a, b, &mut Vec::new(), opts)
}

fn merge_mapping(
    a: &mut Mapping,
    b: &Mapping,
    path: &mut Vec<String>,
    opts: MergeOpts,
) -> Result<()> {
    for (key, bval) in b {
        match a.get_mut(key) {
            Some(aval) => {
                path.push(key_display(key));
                merge_value(aval, bval, path, opts)?;
                path.pop();
            }
            None => {
                if !opts.only_existing {
                    a.insert(key.clone(), bval.clone());
                }
            }
        }
    }
    Ok(())
}

fn merge_value(a: &mut Value, b: &Value, path: &mut Vec<String>, opts: MergeOpts) -> Result<()> {
    // Scalar-vs-list promotion happens before anything else.
    let mut b = b.clone();
    if opts.join_lists {
        if a.is_sequence() && !b.is_sequence() && !b.is_null() {
            b = Value::Sequence(vec![b]);
        } else if !a.is_sequence() && !a.is_null() && b.is_sequence() {
            let prev = std::mem::replace(a, Value::Null);
            *a = Value::Sequence(vec![prev]);
        }
    }

    match (&mut *a, &b) {
        (Value::Mapping(amap), Value::Mapping(bmap)) => {
            // Nested merges keep only the override/join flags, matching the
            // recursion of the reference merge.
            let nested = MergeOpts {
                override_values: opts.override_values,
                join_lists: opts.join_lists,
                ..MergeOpts::default()
            };
            return merge_mapping(amap, bmap, path, nested);
        }
        (Value::Sequence(aseq), Value::Sequence(bseq)) => {
            let combined: Vec<Value> = if opts.change_listorder {
                bseq.iter().chain(aseq.iter()).cloned().collect()
            } else {
                aseq.iter().chain(bseq.iter()).cloned().collect()
            };
            *aseq = uniquify(&combined);
            return Ok(());
        }
        _ => {}
    }

    if *a == b {
        Ok(())
    } else if a.is_null() {
        *a = b;
        Ok(())
    } else if opts.override_values {
        *a = b;
        Ok(())
    } else {
        Err(LazeError::ConflictAtPath {
            path: path.join("."),
            left: value_display(a),
            right: value_display(&b),
        })
    }
}

fn key_display(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => value_display(other),
    }
}

pub fn value_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(s: &str) -> Mapping {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_inserts_missing_keys() {
        let mut a = map("x: 1");
        deep_merge(&mut a, &map("y: 2"), MergeOpts::default()).unwrap();
        assert_eq!(a, map("x: 1\ny: 2"));
    }

    #[test]
    fn test_merge_only_existing_skips() {
        let mut a = map("x: 1");
        let opts = MergeOpts {
            only_existing: true,
            ..Default::default()
        };
        deep_merge(&mut a, &map("y: 2"), opts).unwrap();
        assert_eq!(a, map("x: 1"));
    }

    #[test]
    fn test_merge_lists_uniquify() {
        let mut a = map("l: [a, b]");
        deep_merge(&mut a, &map("l: [b, c]"), MergeOpts::default()).unwrap();
        assert_eq!(a, map("l: [a, b, c]"));
    }

    #[test]
    fn test_merge_lists_change_listorder() {
        let mut a = map("l: [a, b]");
        let opts = MergeOpts {
            change_listorder: true,
            ..Default::default()
        };
        deep_merge(&mut a, &map("l: [b, c]"), opts).unwrap();
        assert_eq!(a, map("l: [b, c, a]"));
    }

    #[test]
    fn test_merge_join_lists_promotes_scalar() {
        let mut a = map("l: [a]");
        let opts = MergeOpts {
            join_lists: true,
            ..Default::default()
        };
        deep_merge(&mut a, &map("l: b"), opts).unwrap();
        assert_eq!(a, map("l: [a, b]"));

        let mut a = map("l: a");
        deep_merge(&mut a, &map("l: [b]"), opts).unwrap();
        assert_eq!(a, map("l: [a, b]"));
    }

    #[test]
    fn test_merge_conflict_without_override() {
        let mut a = map("nested: {x: 1}");
        let err = deep_merge(&mut a, &map("nested: {x: 2}"), MergeOpts::default()).unwrap_err();
        match err {
            LazeError::ConflictAtPath { path, .. } => assert_eq!(path, "nested.x"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_override_adopts_right() {
        let mut a = map("x: 1");
        let opts = MergeOpts {
            override_values: true,
            ..Default::default()
        };
        deep_merge(&mut a, &map("x: 2"), opts).unwrap();
        assert_eq!(a, map("x: 2"));
    }

    #[test]
    fn test_merge_null_adopts_right() {
        let mut a = map("x: null");
        deep_merge(&mut a, &map("x: 2"), MergeOpts::default()).unwrap();
        assert_eq!(a, map("x: 2"));
    }
}
