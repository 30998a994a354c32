//! Variable dictionaries as they cascade from context to builder to app to
//! module: an ordered mapping from variable name to a scalar or a list of
//! strings.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{LazeError, Result};
use crate::util::merge::MergeOpts;
use crate::util::subst::substitute;
use crate::util::uniquify;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_yaml::Value")]
pub enum VarValue {
    Null,
    Scalar(String),
    List(Vec<String>),
}

impl TryFrom<Value> for VarValue {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(VarValue::Null),
            Value::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for entry in seq {
                    out.push(scalar_string(entry)?);
                }
                Ok(VarValue::List(out))
            }
            other => Ok(VarValue::Scalar(scalar_string(other)?)),
        }
    }
}

fn scalar_string(value: Value) -> std::result::Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!(
            "variable values must be scalars or lists of scalars, got: {:?}",
            other
        )),
    }
}

impl VarValue {
    /// `Null` becomes `[]`, a scalar a one-element list.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            VarValue::Null => Vec::new(),
            VarValue::Scalar(s) => vec![s.clone()],
            VarValue::List(l) => l.clone(),
        }
    }

    fn display(&self) -> String {
        match self {
            VarValue::Null => "null".to_string(),
            VarValue::Scalar(s) => s.clone(),
            VarValue::List(l) => format!("[{}]", l.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VarMap(pub IndexMap<String, VarValue>);

impl VarMap {
    pub fn new() -> Self {
        VarMap(IndexMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.0.get(name)
    }

    /// Convert every scalar value into a one-element list. Applied to entity
    /// `vars` at construction time so later merges are list merges.
    pub fn listify_values(&mut self) {
        for (_, value) in self.0.iter_mut() {
            match value {
                VarValue::Null => *value = VarValue::List(Vec::new()),
                VarValue::Scalar(s) => *value = VarValue::List(vec![std::mem::take(s)]),
                VarValue::List(_) => {}
            }
        }
    }

    /// Merge `other` into `self` with the C1 merge option semantics.
    pub fn merge(&mut self, other: &VarMap, opts: MergeOpts) -> Result<()> {
        for (key, bval) in &other.0 {
            match self.0.get_mut(key) {
                None => {
                    if !opts.only_existing {
                        self.0.insert(key.clone(), bval.clone());
                    }
                }
                Some(aval) => merge_value(key, aval, bval, opts)?,
            }
        }
        Ok(())
    }

    /// Apply `${name}` placeholder substitution to every string in the map.
    pub fn substitute(&mut self, table: &HashMap<String, String>) {
        for (_, value) in self.0.iter_mut() {
            match value {
                VarValue::Scalar(s) => {
                    if s.contains('$') {
                        *s = substitute(s, table);
                    }
                }
                VarValue::List(l) => {
                    for entry in l.iter_mut() {
                        if entry.contains('$') {
                            *entry = substitute(entry, table);
                        }
                    }
                }
                VarValue::Null => {}
            }
        }
    }

    /// Look up `name` as a list, materializing an empty list if absent.
    pub fn get_list_mut(&mut self, name: &str) -> &mut Vec<String> {
        let entry = self
            .0
            .entry(name.to_string())
            .or_insert_with(|| VarValue::List(Vec::new()));
        match entry {
            VarValue::List(l) => l,
            other => {
                let promoted = other.as_list();
                *other = VarValue::List(promoted);
                match other {
                    VarValue::List(l) => l,
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn merge_value(key: &str, a: &mut VarValue, b: &VarValue, opts: MergeOpts) -> Result<()> {
    let mut b = b.clone();
    if opts.join_lists {
        if matches!(a, VarValue::List(_)) && matches!(b, VarValue::Scalar(_)) {
            b = VarValue::List(b.as_list());
        } else if matches!(a, VarValue::Scalar(_)) && matches!(b, VarValue::List(_)) {
            *a = VarValue::List(a.as_list());
        }
    }

    if let (VarValue::List(al), VarValue::List(bl)) = (&mut *a, &b) {
        let combined: Vec<String> = if opts.change_listorder {
            bl.iter().chain(al.iter()).cloned().collect()
        } else {
            al.iter().chain(bl.iter()).cloned().collect()
        };
        *al = uniquify(&combined);
        return Ok(());
    }

    if *a == b {
        Ok(())
    } else if matches!(a, VarValue::Null) {
        *a = b;
        Ok(())
    } else if opts.override_values {
        *a = b;
        Ok(())
    } else {
        Err(LazeError::ConflictAtPath {
            path: key.to_string(),
            left: a.display(),
            right: b.display(),
        })
    }
}

/// Apply remove markers: an entry `-x` removes both itself and any plain
/// entry `x` from the list.
pub fn strip_remove_markers(list: &mut Vec<String>) {
    let removals: Vec<String> = list
        .iter()
        .filter(|entry| entry.starts_with('-'))
        .flat_map(|entry| [entry.clone(), entry[1..].to_string()])
        .collect();
    if !removals.is_empty() {
        list.retain(|entry| !removals.contains(entry));
    }
}
