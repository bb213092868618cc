//! Attribute diffing with JSON-pointer ignore paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One change needed to turn the current attributes into the desired ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl DiffOp {
    pub fn path(&self) -> &str {
        match self {
            DiffOp::Add { path, .. } | DiffOp::Remove { path } | DiffOp::Replace { path, .. } => {
                path
            }
        }
    }
}

/// Compute the operations turning `from` into `to`.
///
/// A path is skipped when it equals an ignore entry or lies below one, so
/// ignoring `/spec` also ignores `/spec/image`. Arrays of different lengths
/// are replaced as a whole.
pub fn diff(from: &Value, to: &Value, ignore: &[String]) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    walk(String::new(), from, to, ignore, &mut ops);
    ops
}

fn walk(path: String, from: &Value, to: &Value, ignore: &[String], ops: &mut Vec<DiffOp>) {
    if is_ignored(&path, ignore) {
        return;
    }

    match (from, to) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, av) in a {
                let child = format!("{}/{}", path, escape(key));
                match b.get(key) {
                    Some(bv) => walk(child, av, bv, ignore, ops),
                    None if !is_ignored(&child, ignore) => ops.push(DiffOp::Remove { path: child }),
                    None => {}
                }
            }
            for (key, bv) in b {
                if a.contains_key(key) {
                    continue;
                }
                let child = format!("{}/{}", path, escape(key));
                if !is_ignored(&child, ignore) {
                    ops.push(DiffOp::Add {
                        path: child,
                        value: bv.clone(),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (i, (av, bv)) in a.iter().zip(b).enumerate() {
                walk(format!("{}/{}", path, i), av, bv, ignore, ops);
            }
        }
        _ if from == to => {}
        _ => ops.push(DiffOp::Replace {
            path,
            value: to.clone(),
        }),
    }
}

fn is_ignored(path: &str, ignore: &[String]) -> bool {
    ignore.iter().any(|prefix| {
        path == prefix
            || (path.starts_with(prefix.as_str()) && path[prefix.len()..].starts_with('/'))
    })
}

// RFC 6901 escaping.
fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
