use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

/// One accepted argument of a handler. Built once per handler and cached.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            kind,
            enum_values: Vec::new(),
            range: None,
            examples: Vec::new(),
            default: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::String)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Integer)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Number)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        let mut spec = Self::new(name, description, ParamKind::Boolean);
        spec.examples = vec!["true".to_string(), "false".to_string()];
        spec
    }

    pub fn array(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Array)
    }

    pub fn object(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Object)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn check(&self, args: &Map<String, Value>) -> Result<(), BridgeError> {
        let value = match args.get(&self.name) {
            None | Some(Value::Null) => {
                if self.required {
                    return Err(BridgeError::validation(format!(
                        "Required parameter '{}' is missing.",
                        self.name
                    )));
                }
                return Ok(());
            }
            Some(v) => v,
        };

        if !self.kind.accepts(value) {
            return Err(BridgeError::validation(format!(
                "Parameter '{}' must be of type {}.",
                self.name,
                self.kind.as_str()
            )));
        }

        if !self.enum_values.is_empty() {
            if let Some(s) = value.as_str() {
                if !self.enum_values.iter().any(|e| e == s) {
                    return Err(BridgeError::validation(format!(
                        "Invalid value '{}' for parameter '{}'. Supported values: [{}]",
                        s,
                        self.name,
                        self.enum_values.join(", ")
                    )));
                }
            }
        }

        if let (Some((min, max)), Some(n)) = (self.range, value.as_f64()) {
            if n < min || n > max {
                return Err(BridgeError::validation(format!(
                    "Parameter '{}' must be between {} and {} (got {}).",
                    self.name, min, max, n
                )));
            }
        }

        Ok(())
    }
}

/// Checks required presence, type, enum membership and range. Arguments the
/// schema does not mention are let through untouched.
pub fn validate_args(params: &[ParamSpec], args: &Map<String, Value>) -> Result<(), BridgeError> {
    params.iter().try_for_each(|p| p.check(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    fn schema() -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("action", "What to do")
                .required()
                .one_of(["read", "write"]),
            ParamSpec::integer("frames", "How long").range(0.0, 600.0),
            ParamSpec::boolean("verbose", "Extra output"),
        ]
    }

    #[test]
    fn missing_required_param_is_rejected() {
        let err = validate_args(&schema(), &args(json!({ "frames": 3 }))).expect_err("missing");
        assert_eq!(err.to_string(), "Required parameter 'action' is missing.");
    }

    #[test]
    fn enum_type_and_range_are_checked() {
        let bad_enum = validate_args(&schema(), &args(json!({ "action": "drop" })));
        assert!(bad_enum
            .expect_err("enum")
            .to_string()
            .contains("Supported values: [read, write]"));

        let bad_type = validate_args(&schema(), &args(json!({ "action": "read", "frames": "ten" })));
        assert!(bad_type.expect_err("type").to_string().contains("integer"));

        let bad_range = validate_args(&schema(), &args(json!({ "action": "read", "frames": 601 })));
        assert!(bad_range.is_err());
    }

    #[test]
    fn unknown_and_optional_args_pass() {
        assert!(validate_args(
            &schema(),
            &args(json!({ "action": "write", "verbose": null, "extra": [1, 2] }))
        )
        .is_ok());
    }

    #[test]
    fn boolean_specs_carry_examples() {
        let json = serde_json::to_value(ParamSpec::boolean("verbose", "Extra output")).expect("serialize");
        assert_eq!(json["type"], json!("boolean"));
        assert_eq!(json["examples"], json!(["true", "false"]));
        assert!(json.get("enum_values").is_none());
    }
}
