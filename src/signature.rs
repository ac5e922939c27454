//! Method signatures parsed from the compact type descriptions returned by
//! `getMethodTypes`.
//!
//! A type description is one of:
//!
//! - an empty string (no parameters),
//! - a primitive type name such as `string`, `Boolean` or `int`,
//! - a JSON object mapping field names to primitive type names,
//!
//! each optionally followed by `*` to mark an array of that shape.

use crate::error::{Result, ScalarError};
use serde::ser::Serializer;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Primitive type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    String,
    Bool,
    Int,
    /// Any other type name, kept verbatim
    Other(String),
}

impl TypeTag {
    pub fn from_name(name: &str) -> Self {
        match name {
            "string" => TypeTag::String,
            "Boolean" | "boolean" | "bool" => TypeTag::Bool,
            "int" | "integer" => TypeTag::Int,
            other => TypeTag::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeTag::String => "string",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Other(name) => name,
        }
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Parameter or return shape of one method version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Shape {
    /// No parameters
    Empty,
    /// A single primitive value
    Scalar { ty: TypeTag, repeated: bool },
    /// An object of named primitive fields
    Fields {
        fields: BTreeMap<String, TypeTag>,
        repeated: bool,
    },
}

impl Shape {
    /// Parse a type description
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Shape::Empty);
        }

        let (body, repeated) = match trimmed.strip_suffix('*') {
            Some(body) => (body.trim_end(), true),
            None => (trimmed, false),
        };

        if body.starts_with('{') {
            let map: BTreeMap<String, Value> = serde_json::from_str(body)
                .map_err(|e| ScalarError::Schema(format!("{}: {}", raw, e)))?;

            let mut fields = BTreeMap::new();
            for (field, ty) in map {
                let name = ty.as_str().ok_or_else(|| {
                    ScalarError::Schema(format!("{}: field {} has non-string type {}", raw, field, ty))
                })?;
                fields.insert(field, TypeTag::from_name(name.trim_end_matches('*')));
            }
            return Ok(Shape::Fields { fields, repeated });
        }

        if is_type_name(body) {
            return Ok(Shape::Scalar {
                ty: TypeTag::from_name(body),
                repeated,
            });
        }

        Err(ScalarError::Schema(format!("Unknown type description: {}", raw)))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Shape::Empty)
    }

    pub fn is_repeated(&self) -> bool {
        match self {
            Shape::Empty => false,
            Shape::Scalar { repeated, .. } | Shape::Fields { repeated, .. } => *repeated,
        }
    }
}

fn is_type_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

/// One version of one method's parameter and return shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub name: String,
    pub input: Shape,
    pub output: Shape,
    pub version: String,
}

impl Signature {
    /// Build from one `getMethodTypes` row: `[name, inputs, outputs, version]`
    ///
    /// When an input/output list has several entries the last one is used.
    pub fn from_row(row: &Value) -> Result<Self> {
        let row = row
            .as_array()
            .ok_or_else(|| ScalarError::Schema(format!("method row is not an array: {}", row)))?;

        let name = row
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| ScalarError::Schema("method row without a name".to_string()))?;

        let shape = |idx: usize| -> Result<Shape> {
            match row.get(idx) {
                Some(Value::Array(types)) => match types.last() {
                    Some(Value::String(s)) => Shape::parse(s),
                    Some(other) => Err(ScalarError::Schema(format!(
                        "type description of {} is not a string: {}",
                        name, other
                    ))),
                    None => Ok(Shape::Empty),
                },
                Some(Value::Null) | None => Ok(Shape::Empty),
                Some(other) => Err(ScalarError::Schema(format!(
                    "type list of {} is not an array: {}",
                    name, other
                ))),
            }
        };

        let version = match row.get(3) {
            Some(Value::String(v)) => v.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "1.0".to_string(),
        };

        Ok(Self {
            name: name.to_string(),
            input: shape(1)?,
            output: shape(2)?,
            version,
        })
    }
}

/// Compare dotted version strings numerically (`"1.10"` > `"1.9"`)
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parts = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (pa, pb) = (parts(a), parts(b));
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let x = pa.get(i).copied().unwrap_or(0);
        let y = pb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    a.cmp(b)
}
