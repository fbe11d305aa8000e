//! Field level differences between two job specs.

use std::collections::BTreeSet;
use std::fmt;

use cronwarden_protocols::JobSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// One changed leaf, addressed by a dotted path such as `schedule.expression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub path: String,
    /// `None` when the field is absent on the old side.
    pub before: Option<Value>,
    /// `None` when the field is absent on the new side.
    pub after: Option<Value>,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.path,
            render(self.before.as_ref()),
            render(self.after.as_ref())
        )
    }
}

fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| "(none)".to_string(), Value::to_string)
}

/// Changes needed to turn `from` into `to`, sorted by path.
pub fn diff_specs(from: &JobSpec, to: &JobSpec) -> Result<Vec<FieldChange>, StoreError> {
    let before = serde_json::to_value(from)?;
    let after = serde_json::to_value(to)?;
    let mut changes = Vec::new();
    walk("", Some(&before), Some(&after), &mut changes);
    Ok(changes)
}

fn walk(path: &str, before: Option<&Value>, after: Option<&Value>, out: &mut Vec<FieldChange>) {
    if let (Some(Value::Object(a)), Some(Value::Object(b))) = (before, after) {
        let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
        for key in keys {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            walk(&child, a.get(key), b.get(key), out);
        }
        return;
    }

    if before != after {
        out.push(FieldChange {
            path: path.to_string(),
            before: before.cloned(),
            after: after.cloned(),
        });
    }
}
