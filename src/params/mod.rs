//! # Parameter Schema Compiler
//!
//! Compiles the untyped descriptor list stored on a mapping into a typed
//! validator once, at deploy time. The compiled form is a tagged variant per
//! field; requests are validated against it without re-reading descriptors.
//!
//! Two optional pagination fields, `limit` (default 100) and `offset`
//! (default 0), are always injected when absent. They are transport-level
//! concerns and are stripped before SQL binding.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Number, Value};
use thiserror::Error;

use crate::error::ApiError;
use crate::store::{ParamDescriptor, ParamType};

/// System-wide cap on rows returned by a deployed mapping
pub const MAX_LIMIT: i64 = 100;

/// Field-level validation failure
#[derive(Debug, Clone, Error)]
#[error("validation failed for '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation {
            field: err.field,
            message: err.message,
        }
    }
}

/// Typed form of one field, derived from its descriptor
#[derive(Debug, Clone)]
enum CompiledField {
    Str {
        min_len: Option<usize>,
        max_len: Option<usize>,
        trim: bool,
    },
    Int {
        min: Option<i64>,
        max: Option<i64>,
    },
    Num {
        min: Option<f64>,
        max: Option<f64>,
    },
    Bool,
}

/// One compiled field with presence rules
#[derive(Debug, Clone)]
struct FieldSpec {
    name: String,
    field: CompiledField,
    required: bool,
    default: Option<Value>,
}

/// Compiled validator for a mapping's parameter schema
#[derive(Debug, Clone)]
pub struct ParamValidator {
    fields: Vec<FieldSpec>,
}

/// Validated, typed parameter set. Keys are ordered so logged parameter
/// output is deterministic.
#[derive(Debug, Clone)]
pub struct ValidatedParams {
    values: BTreeMap<String, Value>,
}

impl ValidatedParams {
    /// Effective row limit, clamped to [`MAX_LIMIT`]
    pub fn limit(&self) -> i64 {
        let raw = self
            .values
            .get("limit")
            .and_then(Value::as_i64)
            .unwrap_or(MAX_LIMIT);
        raw.min(MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.values.get("offset").and_then(Value::as_i64).unwrap_or(0)
    }

    /// Parameters passed to the SQL executor as bind values. `limit` and
    /// `offset` are never included here.
    pub fn sql_params(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .filter(|(k, _)| k.as_str() != "limit" && k.as_str() != "offset")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Compile a descriptor list into a validator.
///
/// Never fails: malformed descriptors (empty name) are skipped silently,
/// matching the storage layer that rejects them before they get here.
pub fn compile(descriptors: &[ParamDescriptor]) -> ParamValidator {
    let mut fields = Vec::new();

    for p in descriptors {
        if p.name.is_empty() {
            continue;
        }
        let field = match p.param_type {
            // unknown declared types degrade to string
            ParamType::String | ParamType::Unknown => CompiledField::Str {
                min_len: p.min_length,
                max_len: p.max_length,
                trim: p.strip.unwrap_or(true),
            },
            ParamType::Integer => CompiledField::Int {
                min: p.min.map(|v| v as i64),
                max: p.max.map(|v| v as i64),
            },
            ParamType::Number => CompiledField::Num {
                min: p.min,
                max: p.max,
            },
            ParamType::Boolean => CompiledField::Bool,
        };
        fields.push(FieldSpec {
            name: p.name.clone(),
            field,
            required: p.is_required(),
            default: p.default.clone(),
        });
    }

    // Pagination fields are always present, optional, with defaults.
    if !fields.iter().any(|f| f.name == "limit") {
        fields.push(FieldSpec {
            name: "limit".to_string(),
            field: CompiledField::Int {
                min: Some(0),
                max: None,
            },
            required: false,
            default: Some(Value::from(100)),
        });
    }
    if !fields.iter().any(|f| f.name == "offset") {
        fields.push(FieldSpec {
            name: "offset".to_string(),
            field: CompiledField::Int {
                min: Some(0),
                max: None,
            },
            required: false,
            default: Some(Value::from(0)),
        });
    }

    ParamValidator { fields }
}

impl ParamValidator {
    /// Validate a raw parameter map gathered from the request.
    ///
    /// Fails on a missing required field, failed coercion, or violated
    /// bound. Optional fields without a value validate to null so SQL
    /// placeholders referencing them bind NULL.
    pub fn validate(
        &self,
        raw: &HashMap<String, Value>,
    ) -> Result<ValidatedParams, ValidationError> {
        let mut values = BTreeMap::new();

        for spec in &self.fields {
            let value = match raw.get(&spec.name) {
                Some(v) => coerce(&spec.name, v, &spec.field)?,
                None => match (&spec.default, spec.required) {
                    (Some(default), _) => default.clone(),
                    (None, true) => {
                        return Err(ValidationError::new(&spec.name, "field required"));
                    }
                    (None, false) => Value::Null,
                },
            };
            if !value.is_null() {
                check_bounds(&spec.name, &value, &spec.field)?;
            }
            values.insert(spec.name.clone(), value);
        }

        Ok(ValidatedParams { values })
    }

    /// Names of all compiled fields (pagination included)
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

fn coerce(field: &str, raw: &Value, compiled: &CompiledField) -> Result<Value, ValidationError> {
    match compiled {
        CompiledField::Str { trim, .. } => {
            let s = match raw {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(ValidationError::new(field, "expected a string")),
            };
            let s = if *trim { s.trim().to_string() } else { s };
            Ok(Value::String(s))
        }
        CompiledField::Int { .. } => {
            let n = match raw {
                Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| ValidationError::new(field, "expected an integer"))?,
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ValidationError::new(field, "expected an integer"))?,
                _ => return Err(ValidationError::new(field, "expected an integer")),
            };
            Ok(Value::from(n))
        }
        CompiledField::Num { .. } => {
            let n = match raw {
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| ValidationError::new(field, "expected a number"))?,
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ValidationError::new(field, "expected a number"))?,
                _ => return Err(ValidationError::new(field, "expected a number")),
            };
            let n = Number::from_f64(n)
                .ok_or_else(|| ValidationError::new(field, "expected a finite number"))?;
            Ok(Value::Number(n))
        }
        CompiledField::Bool => match raw {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(ValidationError::new(field, "expected a boolean")),
            },
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            _ => Err(ValidationError::new(field, "expected a boolean")),
        },
    }
}

fn check_bounds(field: &str, value: &Value, compiled: &CompiledField) -> Result<(), ValidationError> {
    match compiled {
        CompiledField::Str { min_len, max_len, .. } => {
            let len = value.as_str().map(|s| s.chars().count()).unwrap_or(0);
            if let Some(min) = min_len {
                if len < *min {
                    return Err(ValidationError::new(
                        field,
                        format!("shorter than minimum length {}", min),
                    ));
                }
            }
            if let Some(max) = max_len {
                if len > *max {
                    return Err(ValidationError::new(
                        field,
                        format!("longer than maximum length {}", max),
                    ));
                }
            }
        }
        CompiledField::Int { min, max } => {
            let n = value.as_i64().unwrap_or(0);
            if let Some(min) = min {
                if n < *min {
                    return Err(ValidationError::new(field, format!("must be >= {}", min)));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(ValidationError::new(field, format!("must be <= {}", max)));
                }
            }
        }
        CompiledField::Num { min, max } => {
            let n = value.as_f64().unwrap_or(0.0);
            if let Some(min) = min {
                if n < *min {
                    return Err(ValidationError::new(field, format!("must be >= {}", min)));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(ValidationError::new(field, format!("must be <= {}", max)));
                }
            }
        }
        CompiledField::Bool => {}
    }
    Ok(())
}
