//! Deploy request validation.
//!
//! Shape and type problems are collected field by field so a caller gets every
//! violation at once; value constraints come from the `Validate` derive on
//! [`DeployJob`] and are merged into the same list.

use crate::DeployJob;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid deploy request:")?;
        for violation in &self.violations {
            write!(f, " {}: {};", violation.field, violation.message)?;
        }
        Ok(())
    }
}

/// Parses a raw request body.
pub fn parse(body: &[u8]) -> Result<DeployJob, ValidationError> {
    let value: Value = serde_json::from_slice(body).map_err(|err| ValidationError {
        violations: vec![FieldViolation::new("body", format!("invalid JSON: {err}"))],
    })?;
    validate(&value)
}

pub fn validate(body: &Value) -> Result<DeployJob, ValidationError> {
    let object = match body.as_object() {
        Some(object) => object,
        None => {
            return Err(ValidationError {
                violations: vec![FieldViolation::new("body", "expected a JSON object")],
            })
        }
    };

    let mut fields = Fields {
        object,
        violations: Vec::new(),
    };

    let server_id = fields.required_str("serverId");
    let job = DeployJob {
        server_id: server_id.unwrap_or_default(),
        application_id: fields.optional_str("applicationId"),
        compose_id: fields.optional_str("composeId"),
        deployment_id: fields.optional_str("deploymentId"),
        application_type: fields.optional_enum("applicationType", &["application", "compose"]),
        kind: fields.optional_enum("type", &["deploy", "redeploy"]),
        title_log: fields.optional_str("titleLog"),
        description_log: fields.optional_str("descriptionLog"),
        server: fields.optional_bool("server"),
    };

    let mut violations = fields.violations;

    if let Err(errors) = job.validate() {
        for (field, errs) in errors.field_errors() {
            let field = camel_case(&field);
            // already reported as a type problem
            if violations.iter().any(|v| v.field == field) {
                continue;
            }
            for err in errs {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                violations.push(FieldViolation::new(field.clone(), message));
            }
        }
    }

    if violations.is_empty() {
        Ok(job)
    } else {
        violations.sort_by(|a, b| a.field.cmp(&b.field));
        Err(ValidationError { violations })
    }
}

struct Fields<'a> {
    object: &'a Map<String, Value>,
    violations: Vec<FieldViolation>,
}

impl Fields<'_> {
    fn required_str(&mut self, name: &str) -> Option<String> {
        let object = self.object;
        match object.get(name) {
            None | Some(Value::Null) => {
                self.violations.push(FieldViolation::new(name, "is required"));
                None
            }
            Some(value) => self.as_str(name, value),
        }
    }

    fn optional_str(&mut self, name: &str) -> Option<String> {
        let object = self.object;
        match object.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => self.as_str(name, value),
        }
    }

    fn as_str(&mut self, name: &str, value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            other => {
                self.violations.push(FieldViolation::new(
                    name,
                    format!("expected string, received {}", type_name(other)),
                ));
                None
            }
        }
    }

    fn optional_bool(&mut self, name: &str) -> Option<bool> {
        match self.object.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(other) => {
                self.violations.push(FieldViolation::new(
                    name,
                    format!("expected boolean, received {}", type_name(other)),
                ));
                None
            }
        }
    }

    fn optional_enum<T: serde::de::DeserializeOwned>(
        &mut self,
        name: &str,
        variants: &[&str],
    ) -> Option<T> {
        let raw = self.optional_str(name)?;
        match serde_json::from_value::<T>(Value::String(raw.clone())) {
            Ok(v) => Some(v),
            Err(_) => {
                self.violations.push(FieldViolation::new(
                    name,
                    format!("expected one of {}, received '{raw}'", variants.join(" | ")),
                ));
                None
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
