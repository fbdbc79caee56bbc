//! Parameter validation.
//!
//! A resource may declare any combination of three mechanisms; all configured mechanisms
//! run and their messages are joined with newlines:
//!
//! - a predicate returning an optional message,
//! - an inline JSON Schema (draft 4),
//! - a path to a JSON Schema file, loaded when the check runs.
//!
//! Schema errors are reported one per line in the form
//! `TypeError: At path: #/cloneFrom, had an error (type), expected string but got array.`

use jsonschema::error::ValidationErrorKind;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Message for a schema that is not a JSON object.
pub const SCHEMA_NOT_OBJECT: &str = "FATAL: Any Lambda Schema should be a plain Object.";

/// Message for an object schema that fails the draft 4 meta-schema.
pub const SCHEMA_NOT_DRAFT4: &str =
    "The custom resource's schema was an object, but was not valid JSONSchema v4.";

/// Message for a malformed schema path.
pub const SCHEMA_PATH_MALFORMED: &str = "FATAL: Any Lambda SchemaPath should be an Array of String.";

/// Message for a schema path that does not lead to a JSON document.
pub const SCHEMA_PATH_MISSING: &str = "FATAL: No JSON was found at SchemaPath";

/// Custom validation predicate. `None` or an empty message means valid.
pub type ValidateFn = Arc<dyn Fn(Option<&Value>) -> Option<String> + Send + Sync>;

/// The validation mechanisms declared by a resource.
#[derive(Clone, Default)]
pub struct ValidationRules {
    /// Custom predicate
    pub validate: Option<ValidateFn>,
    /// Inline schema
    pub schema: Option<Value>,
    /// Path segments of a schema file, joined like a filesystem path
    pub schema_path: Option<Vec<String>>,
}

impl fmt::Debug for ValidationRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRules")
            .field("validate", &self.validate.as_ref().map(|_| "<fn>"))
            .field("schema", &self.schema)
            .field("schema_path", &self.schema_path)
            .finish()
    }
}

impl ValidationRules {
    /// Whether no mechanism is configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.validate.is_none() && self.schema.is_none() && self.schema_path.is_none()
    }
}

/// Run every configured mechanism against `params`.
///
/// Returns `None` when the parameters are valid, otherwise the newline-joined messages.
/// Absent parameters are validated as `null`.
#[must_use]
pub fn check_if_invalid(params: Option<&Value>, rules: &ValidationRules) -> Option<String> {
    let mut invalidations: Vec<String> = Vec::new();

    if let Some(validate) = &rules.validate {
        invalidations.extend(validate(params));
    }

    let instance = params.unwrap_or(&Value::Null);

    if let Some(schema) = &rules.schema {
        invalidations.extend(check_schema(instance, schema));
    }

    if let Some(segments) = &rules.schema_path {
        if segments.is_empty() {
            invalidations.push(SCHEMA_PATH_MALFORMED.to_owned());
        } else {
            match load_schema(segments) {
                Some(schema) => invalidations.extend(check_schema(instance, &schema)),
                None => invalidations.push(SCHEMA_PATH_MISSING.to_owned()),
            }
        }
    }

    let joined = invalidations
        .into_iter()
        .filter(|message| !message.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    (!joined.is_empty()).then_some(joined)
}

fn load_schema(segments: &[String]) -> Option<Value> {
    let path: PathBuf = segments.iter().collect();
    let contents = std::fs::read_to_string(&path)
        .inspect_err(|e| tracing::warn!(path = %path.display(), error = %e, "Schema file unreadable"))
        .ok()?;
    serde_json::from_str(&contents)
        .inspect_err(|e| tracing::warn!(path = %path.display(), error = %e, "Schema file is not JSON"))
        .ok()
}

/// Validate `instance` against `schema`, returning the formatted error lines if any.
fn check_schema(instance: &Value, schema: &Value) -> Option<String> {
    if !schema.is_object() {
        return Some(SCHEMA_NOT_OBJECT.to_owned());
    }
    if !jsonschema::draft4::meta::is_valid(schema) {
        return Some(SCHEMA_NOT_DRAFT4.to_owned());
    }
    let Ok(validator) = jsonschema::draft4::new(schema) else {
        return Some(SCHEMA_NOT_DRAFT4.to_owned());
    };

    let lines = validator
        .iter_errors(instance)
        .map(|error| {
            let schema_path = error.schema_path.to_string();
            let keyword = schema_path.rsplit('/').next().unwrap_or_default().to_owned();

            let (expected, got) = match &error.kind {
                ValidationErrorKind::Required { property } => {
                    (render(property), "undefined".to_owned())
                }
                ValidationErrorKind::Type { .. } => (
                    schema.pointer(&schema_path).map(render).unwrap_or_default(),
                    type_name(&error.instance).to_owned(),
                ),
                _ => (
                    schema.pointer(&schema_path).map(render).unwrap_or_default(),
                    render(&error.instance),
                ),
            };

            format!(
                "TypeError: At path: #{}, had an error ({keyword}), expected {expected} but got {got}.",
                error.instance_path
            )
        })
        .collect::<Vec<_>>();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Render a constraint or tested value the way it reads in a message.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn good_schema() -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": { "type": "string" },
                "cloneFrom": { "type": "string" },
                "description": { "type": "string" }
            }
        })
    }

    fn schema_rules(schema: Value) -> ValidationRules {
        ValidationRules {
            schema: Some(schema),
            ..ValidationRules::default()
        }
    }

    fn numbers_add_to_ten() -> ValidateFn {
        Arc::new(|params| {
            let valid = params
                .and_then(|p| p.get("numbers"))
                .and_then(Value::as_array)
                .is_some_and(|numbers| {
                    numbers.iter().map(Value::as_f64).sum::<Option<f64>>() == Some(10.0)
                });
            (!valid).then(|| "Property \"numbers\" should be Array of Number adding to 10.".to_owned())
        })
    }

    #[test]
    fn no_rules_is_valid() {
        assert_eq!(check_if_invalid(Some(&json!({})), &ValidationRules::default()), None);
    }

    #[test]
    fn empty_schema_accepts_object() {
        let rules = schema_rules(json!({ "type": "object", "properties": {} }));
        assert_eq!(check_if_invalid(Some(&json!({})), &rules), None);
    }

    #[test]
    fn good_params_pass_schema() {
        let params = json!({ "name": "myapi", "description": "Foobarbazqux" });
        assert_eq!(check_if_invalid(Some(&params), &schema_rules(good_schema())), None);
    }

    #[test]
    fn missing_required_property_is_reported() {
        let params = json!({ "description": "oops this should explode" });
        assert_eq!(
            check_if_invalid(Some(&params), &schema_rules(good_schema())).as_deref(),
            Some("TypeError: At path: #, had an error (required), expected name but got undefined.")
        );
    }

    #[test]
    fn wrong_type_is_reported_with_pointer() {
        let params = json!({ "name": "Andrew Templeton", "cloneFrom": ["not", "a", "string", "oops!"] });
        assert_eq!(
            check_if_invalid(Some(&params), &schema_rules(good_schema())).as_deref(),
            Some("TypeError: At path: #/cloneFrom, had an error (type), expected string but got array.")
        );
    }

    #[test]
    fn non_object_schema_is_fatal() {
        assert_eq!(
            check_if_invalid(Some(&json!({})), &schema_rules(json!("nope"))).as_deref(),
            Some(SCHEMA_NOT_OBJECT)
        );
    }

    #[test]
    fn schema_failing_meta_schema_is_reported() {
        assert_eq!(
            check_if_invalid(Some(&json!({})), &schema_rules(json!({ "type": "terrible schema" })))
                .as_deref(),
            Some(SCHEMA_NOT_DRAFT4)
        );
    }

    #[test]
    fn predicate_sees_absent_params() {
        let rules = ValidationRules {
            validate: Some(numbers_add_to_ten()),
            ..ValidationRules::default()
        };
        assert!(check_if_invalid(None, &rules).is_some());
        assert!(check_if_invalid(Some(&json!({ "numbers": "taco!" })), &rules).is_some());
        assert_eq!(check_if_invalid(Some(&json!({ "numbers": [1, 2, 3, 4] })), &rules), None);
    }

    #[test]
    fn empty_predicate_message_counts_as_valid() {
        let rules = ValidationRules {
            validate: Some(Arc::new(|_| Some(String::new()))),
            ..ValidationRules::default()
        };
        assert_eq!(check_if_invalid(None, &rules), None);
    }

    #[test]
    fn messages_from_all_mechanisms_are_joined() {
        let rules = ValidationRules {
            validate: Some(Arc::new(|_| Some("first".to_owned()))),
            schema: Some(json!(["not", "an", "object"])),
            schema_path: Some(Vec::new()),
        };
        assert_eq!(
            check_if_invalid(Some(&json!({})), &rules).as_deref(),
            Some("first\nFATAL: Any Lambda Schema should be a plain Object.\nFATAL: Any Lambda SchemaPath should be an Array of String.")
        );
    }

    #[test]
    fn missing_schema_file_is_fatal() {
        let rules = ValidationRules {
            schema_path: Some(vec!["/definitely".to_owned(), "not-here.json".to_owned()]),
            ..ValidationRules::default()
        };
        assert_eq!(check_if_invalid(Some(&json!({})), &rules).as_deref(), Some(SCHEMA_PATH_MISSING));
    }

    #[test]
    fn schema_file_is_loaded_and_applied() -> Result<(), std::io::Error> {
        let dir = std::env::temp_dir().join(format!("cfn-resource-schema-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("schema.json"), good_schema().to_string())?;

        let rules = ValidationRules {
            schema_path: Some(vec![dir.display().to_string(), "schema.json".to_owned()]),
            ..ValidationRules::default()
        };
        let result = check_if_invalid(Some(&json!({})), &rules);
        std::fs::remove_dir_all(&dir)?;

        assert_eq!(
            result.as_deref(),
            Some("TypeError: At path: #, had an error (required), expected name but got undefined.")
        );
        Ok(())
    }
}
