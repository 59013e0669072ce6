//! Shared namespace: cross-task settings addressed by dotted paths.
//!
//! Fields must be declared before use. A declared field always has a value
//! (its default until written), so readers never probe for presence.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::errors::{Result, RotaError};
use crate::domain::time::parse_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Integer,
    Text,
    /// `YYYY-MM-DD HH:MM:SS` string, or null for "unset".
    Timestamp,
    /// Unchecked. Used for fields that are validated by their reader.
    Any,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Integer => "integer",
            FieldKind::Text => "text",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Any => "any",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Text => value.is_string(),
            FieldKind::Timestamp => match value {
                Value::Null => true,
                Value::String(s) => parse_timestamp(s).is_ok(),
                _ => false,
            },
            FieldKind::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
struct Field {
    kind: FieldKind,
    value: Value,
}

#[derive(Debug, Default, Clone)]
pub struct SharedNamespace {
    fields: BTreeMap<String, Field>,
}

impl SharedNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `path` with a default value.
    ///
    /// Re-declaring with the same kind keeps the current value; a different
    /// kind is a `TypeMismatch`.
    pub fn declare(&mut self, path: &str, kind: FieldKind, default: Value) -> Result<()> {
        if let Some(existing) = self.fields.get(path) {
            if existing.kind != kind {
                return Err(RotaError::TypeMismatch {
                    path: path.to_string(),
                    expected: existing.kind.name(),
                });
            }
            return Ok(());
        }
        if !kind.accepts(&default) {
            return Err(RotaError::TypeMismatch {
                path: path.to_string(),
                expected: kind.name(),
            });
        }
        self.fields.insert(
            path.to_string(),
            Field {
                kind,
                value: default,
            },
        );
        Ok(())
    }

    pub fn is_declared(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Result<&Value> {
        self.lookup(path)
            .ok_or_else(|| RotaError::UndeclaredPath(path.to_string()))
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.fields.get(path).map(|f| &f.value)
    }

    /// Type-check `value` against the declaration of `path`.
    pub fn check(&self, path: &str, value: &Value) -> Result<()> {
        let field = self
            .fields
            .get(path)
            .ok_or_else(|| RotaError::UndeclaredPath(path.to_string()))?;
        if field.kind.accepts(value) {
            Ok(())
        } else {
            Err(RotaError::TypeMismatch {
                path: path.to_string(),
                expected: field.kind.name(),
            })
        }
    }

    /// Write a declared field, returning the previous value.
    pub fn set(&mut self, path: &str, value: Value) -> Result<Value> {
        self.check(path, &value)?;
        let field = self
            .fields
            .get_mut(path)
            .ok_or_else(|| RotaError::UndeclaredPath(path.to_string()))?;
        Ok(std::mem::replace(&mut field.value, value))
    }

    /// Apply a nested JSON object of initial values.
    ///
    /// Leaves that are not declared, or do not type-check, are skipped with a
    /// warning. Returns the number of fields written.
    pub fn load_tree(&mut self, tree: &Value) -> usize {
        let Value::Object(map) = tree else {
            if !tree.is_null() {
                warn!("namespace initial values must be an object; ignored");
            }
            return 0;
        };
        let mut applied = 0;
        self.load_object("", map, &mut applied);
        applied
    }

    fn load_object(&mut self, prefix: &str, map: &Map<String, Value>, applied: &mut usize) {
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if self.is_declared(&path) {
                match self.set(&path, value.clone()) {
                    Ok(_) => *applied += 1,
                    Err(e) => warn!(path = %path, error = %e, "initial value rejected"),
                }
            } else if let Value::Object(inner) = value {
                self.load_object(&path, inner, applied);
            } else {
                warn!(path = %path, "initial value for undeclared field skipped");
            }
        }
    }

    /// Current values as a nested JSON object.
    pub fn snapshot(&self) -> Value {
        let mut root = Map::new();
        for (path, field) in &self.fields {
            let mut cursor = &mut root;
            let mut parts = path.split('.').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_none() {
                    cursor.insert(part.to_string(), field.value.clone());
                    break;
                }
                let slot = cursor
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                match slot {
                    Value::Object(next) => cursor = next,
                    _ => break,
                }
            }
        }
        Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(FieldKind::Bool, json!(true), true)]
    #[case(FieldKind::Bool, json!(1), false)]
    #[case(FieldKind::Integer, json!(5), true)]
    #[case(FieldKind::Integer, json!("5"), false)]
    #[case(FieldKind::Text, json!("submarine"), true)]
    #[case(FieldKind::Timestamp, json!("2024-01-02 00:05:00"), true)]
    #[case(FieldKind::Timestamp, json!(null), true)]
    #[case(FieldKind::Timestamp, json!("tomorrow"), false)]
    #[case(FieldKind::Any, json!("abc"), true)]
    fn kinds_check_values(#[case] kind: FieldKind, #[case] value: Value, #[case] ok: bool) {
        assert_eq!(kind.accepts(&value), ok);
    }

    #[test]
    fn undeclared_paths_are_rejected() {
        let mut ns = SharedNamespace::new();
        assert!(matches!(ns.get("A.B"), Err(RotaError::UndeclaredPath(_))));
        assert!(matches!(
            ns.set("A.B", json!(1)),
            Err(RotaError::UndeclaredPath(_))
        ));
        assert!(ns.lookup("A.B").is_none());
    }

    #[test]
    fn declared_field_has_default_until_set() {
        let mut ns = SharedNamespace::new();
        ns.declare("OpsiFleet.Submarine", FieldKind::Bool, json!(false))
            .unwrap();
        assert_eq!(ns.get("OpsiFleet.Submarine").unwrap(), &json!(false));

        let prev = ns.set("OpsiFleet.Submarine", json!(true)).unwrap();
        assert_eq!(prev, json!(false));
        assert!(matches!(
            ns.set("OpsiFleet.Submarine", json!("yes")),
            Err(RotaError::TypeMismatch { .. })
        ));

        // redeclaring keeps the value
        ns.declare("OpsiFleet.Submarine", FieldKind::Bool, json!(false))
            .unwrap();
        assert_eq!(ns.get("OpsiFleet.Submarine").unwrap(), &json!(true));
    }

    #[test]
    fn load_tree_applies_declared_leaves_only() {
        let mut ns = SharedNamespace::new();
        ns.declare("A.Fleet.Submarine", FieldKind::Bool, json!(false))
            .unwrap();
        ns.declare("A.Filter.Filter", FieldKind::Text, json!(""))
            .unwrap();

        let applied = ns.load_tree(&json!({
            "A": {
                "Fleet": { "Submarine": true, "Extra": 3 },
                "Filter": { "Filter": 7 }
            }
        }));
        assert_eq!(applied, 1);
        assert_eq!(ns.get("A.Fleet.Submarine").unwrap(), &json!(true));
        assert_eq!(ns.get("A.Filter.Filter").unwrap(), &json!(""));
    }

    #[test]
    fn snapshot_nests_paths() {
        let mut ns = SharedNamespace::new();
        ns.declare("A.B.C", FieldKind::Integer, json!(1)).unwrap();
        ns.declare("A.D", FieldKind::Text, json!("x")).unwrap();
        assert_eq!(ns.snapshot(), json!({"A": {"B": {"C": 1}, "D": "x"}}));
    }
}
