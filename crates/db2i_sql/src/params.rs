//! Parameter validation, coercion, and SQL rewriting.
//!
//! Named `:name` parameters are rewritten to `?` placeholders with a bind
//! vector in placeholder order. Array values expand to `(?, ?, …)`.
//! Template syntax (`{{name}}`) is rejected outright.

use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};
use crate::value::SqlValue;
use db2i_protocol::{McpError, McpResult};
use regex::Regex;
use serde_json::{json, Value};

/// Semantic parameter types accepted in tool declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }

    /// JSON Schema type name for input-schema emission.
    pub fn json_schema_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }
}

/// A declared tool parameter.
///
/// Serde names follow the YAML tool-configuration surface (camelCase,
/// `type`, `enum`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    /// Minimum length for strings and arrays.
    #[serde(default)]
    pub min_length: Option<usize>,
    /// Maximum length for strings and arrays.
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Regex the string value must match. A malformed pattern downgrades
    /// to a warning rather than a failure.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Lower bound for numeric types.
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound for numeric types.
    #[serde(default)]
    pub max: Option<f64>,
    /// Element type for arrays (defaults to string).
    #[serde(default)]
    pub item_type: Option<ParamType>,
    /// Allowed scalar values.
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default: None,
            description: None,
            min_length: None,
            max_length: None,
            pattern: None,
            min: None,
            max: None,
            item_type: None,
            enum_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Pattern parameter names must match.
pub const PARAMETER_NAME_PATTERN: &str = "^[A-Za-z_][A-Za-z0-9_]*$";

/// Whether `name` is a legal parameter name.
pub fn is_valid_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Detected placeholder style of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterMode {
    Named,
    Positional,
    Hybrid,
    None,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProcessStats {
    pub named_count: usize,
    pub positional_count: usize,
    pub array_expansions: usize,
    pub total_binds: usize,
}

/// Output of [`process`].
#[derive(Debug, Clone)]
pub struct ProcessedSql {
    /// Rewritten SQL with `?` placeholders.
    pub sql: String,
    /// Bind values in placeholder order.
    pub params: Vec<SqlValue>,
    /// Declared parameter names, in declaration order.
    pub parameter_names: Vec<String>,
    /// Named parameters referenced in the SQL but left unbound.
    pub missing: Vec<String>,
    pub mode: ParameterMode,
    pub warnings: Vec<String>,
    pub stats: ProcessStats,
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Allow the single-slot direct substitution path (`execute_sql`).
    pub direct_substitution: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self { direct_substitution: true }
    }
}

enum Coerced {
    Scalar(SqlValue),
    Array(Vec<SqlValue>),
}

/// Validate `values` against `definitions` and rewrite `sql`.
///
/// All validation failures aggregate into a single error listing every
/// message; warnings (lossy coercions, unresolvable placeholders) are
/// carried on the result.
pub fn process(
    sql: &str,
    values: &Value,
    definitions: &[ParameterDefinition],
    options: &ProcessOptions,
) -> McpResult<ProcessedSql> {
    if sql.contains("{{") && sql.contains("}}") {
        return Err(validation_error(vec![
            "Template mode is deprecated; use :name or ?".to_string(),
        ]));
    }

    let tokens = tokenize(sql).map_err(|e| validation_error(vec![e.to_string()]))?;

    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for def in definitions {
        if !is_valid_parameter_name(&def.name) {
            errors.push(format!("Invalid parameter name: {}", def.name));
        }
    }

    // Resolve and coerce every declared parameter up front. An array
    // input is positional: values pair with definitions by position in
    // `coerce_positional` instead.
    let positional_input = values.is_array();
    let mut coerced: Vec<Option<Coerced>> = Vec::with_capacity(definitions.len());
    for def in definitions {
        if positional_input {
            coerced.push(None);
            continue;
        }
        match resolve_value(def, values) {
            Some(raw) => match coerce(def, &raw, &mut warnings) {
                Ok(value) => coerced.push(Some(value)),
                Err(mut msgs) => {
                    errors.append(&mut msgs);
                    coerced.push(None);
                }
            },
            None => {
                if def.required {
                    errors.push(format!("Missing required parameter: {}", def.name));
                }
                coerced.push(None);
            }
        }
    }

    if !errors.is_empty() {
        return Err(validation_error(errors));
    }

    // Single-slot direct substitution: one declared parameter and a SQL
    // body that is exactly that placeholder.
    if options.direct_substitution && definitions.len() == 1 {
        let slot = format!(":{}", definitions[0].name);
        if sql.trim() == slot {
            if let Some(Coerced::Scalar(value)) = &coerced[0] {
                return Ok(ProcessedSql {
                    sql: value.to_string(),
                    params: Vec::new(),
                    parameter_names: vec![definitions[0].name.clone()],
                    missing: Vec::new(),
                    mode: ParameterMode::Named,
                    warnings,
                    stats: ProcessStats {
                        named_count: 1,
                        ..Default::default()
                    },
                });
            }
        }
    }

    let named_sites: Vec<&Token> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Parameter)
        .collect();
    let positional_sites: Vec<&Token> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Operator && t.text == "?")
        .collect();

    let mode = match (named_sites.is_empty(), positional_sites.is_empty()) {
        (false, false) => ParameterMode::Hybrid,
        (false, true) => ParameterMode::Named,
        (true, false) => ParameterMode::Positional,
        (true, true) => ParameterMode::None,
    };

    // Residual values fill pre-existing `?` sites: in positional mode the
    // input array in order, in hybrid mode the declared-but-unreferenced
    // definitions in declaration order.
    let referenced: Vec<&str> = named_sites
        .iter()
        .filter_map(|t| t.parameter_name())
        .collect();
    let mut residual: Vec<Coerced> = Vec::new();
    match mode {
        ParameterMode::Positional => {
            residual = coerce_positional(values, definitions, &mut errors, &mut warnings)?;
        }
        ParameterMode::Hybrid => {
            for (def, value) in definitions.iter().zip(coerced.iter_mut()) {
                if !referenced.contains(&def.name.as_str()) {
                    if let Some(v) = value.take() {
                        residual.push(v);
                    }
                }
            }
        }
        _ => {}
    }
    if !errors.is_empty() {
        return Err(validation_error(errors));
    }
    let mut residual_iter = residual.into_iter();

    // Rewrite: walk every placeholder site in textual order so the bind
    // vector matches the placeholder order of the rewritten SQL.
    let mut out = String::with_capacity(sql.len());
    let mut binds: Vec<SqlValue> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    let mut stats = ProcessStats::default();
    let mut cursor = 0usize;

    for token in &tokens {
        let is_named = token.kind == TokenKind::Parameter;
        let is_positional = token.kind == TokenKind::Operator && token.text == "?";
        if !is_named && !is_positional {
            continue;
        }

        out.push_str(&sql[cursor..token.offset]);
        cursor = token.offset + token.len();

        if is_named {
            stats.named_count += 1;
            let name = token.parameter_name().unwrap_or_default();
            match definitions.iter().position(|d| d.name == name) {
                Some(idx) => match &coerced[idx] {
                    Some(Coerced::Scalar(value)) => {
                        out.push('?');
                        binds.push(value.clone());
                    }
                    Some(Coerced::Array(items)) => {
                        stats.array_expansions += 1;
                        // An empty array expands to NULL so `IN ()` never
                        // reaches the driver; it matches no rows.
                        let placeholders = if items.is_empty() {
                            "NULL".to_string()
                        } else {
                            vec!["?"; items.len()].join(", ")
                        };
                        if enclosed_in_parens(sql, token) {
                            out.push_str(&placeholders);
                        } else {
                            out.push('(');
                            out.push_str(&placeholders);
                            out.push(')');
                        }
                        binds.extend(items.iter().cloned());
                    }
                    None => {
                        // Optional and unbound: leave the placeholder for
                        // downstream layers to reject on execution.
                        if !missing.iter().any(|m| m == name) {
                            missing.push(name.to_string());
                        }
                        warnings.push(format!("No value bound for parameter :{name}"));
                        out.push_str(&token.text);
                    }
                },
                None => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    warnings.push(format!("No definition for parameter :{name}"));
                    out.push_str(&token.text);
                }
            }
        } else {
            stats.positional_count += 1;
            out.push('?');
            match residual_iter.next() {
                Some(Coerced::Scalar(value)) => binds.push(value),
                Some(Coerced::Array(items)) => {
                    errors.push("Array values cannot bind to positional ? placeholders".into());
                    binds.extend(items);
                }
                None => {
                    warnings.push("Unfilled positional placeholder".into());
                }
            }
        }
    }
    out.push_str(&sql[cursor..]);

    if !errors.is_empty() {
        return Err(validation_error(errors));
    }

    stats.total_binds = binds.len();

    Ok(ProcessedSql {
        sql: out,
        params: binds,
        parameter_names: definitions.iter().map(|d| d.name.clone()).collect(),
        missing,
        mode,
        warnings,
        stats,
    })
}

/// Whether a parameter token sits directly inside `( … )`, as in
/// `IN (:ids)`; expansion then omits its own parentheses.
fn enclosed_in_parens(sql: &str, token: &Token) -> bool {
    let before = sql[..token.offset].trim_end();
    let after = sql[token.offset + token.len()..].trim_start();
    before.ends_with('(') && after.starts_with(')')
}

fn resolve_value(def: &ParameterDefinition, values: &Value) -> Option<Value> {
    let provided = match values {
        Value::Object(map) => map.get(&def.name).cloned(),
        _ => None,
    };
    match provided {
        Some(Value::Null) | None => def.default.clone(),
        Some(v) => Some(v),
    }
}

fn coerce(
    def: &ParameterDefinition,
    raw: &Value,
    warnings: &mut Vec<String>,
) -> Result<Coerced, Vec<String>> {
    match def.param_type {
        ParamType::Array => {
            let items = match raw {
                Value::Array(items) => items,
                _ => {
                    return Err(vec![format!(
                        "Parameter {} must be an array",
                        def.name
                    )])
                }
            };
            if let Some(min) = def.min_length {
                if items.len() < min {
                    return Err(vec![format!(
                        "Parameter {} must have at least {} elements",
                        def.name, min
                    )]);
                }
            }
            if let Some(max) = def.max_length {
                if items.len() > max {
                    return Err(vec![format!(
                        "Parameter {} must have at most {} elements",
                        def.name, max
                    )]);
                }
            }
            let item_type = def.item_type.unwrap_or(ParamType::String);
            let item_def = ParameterDefinition {
                param_type: item_type,
                min_length: None,
                max_length: None,
                ..def.clone()
            };
            let mut out = Vec::with_capacity(items.len());
            let mut errors = Vec::new();
            for (idx, item) in items.iter().enumerate() {
                match coerce_scalar(&item_def, item, warnings) {
                    Ok(v) => out.push(v),
                    Err(msg) => errors.push(format!("{} (element {})", msg, idx)),
                }
            }
            if errors.is_empty() {
                Ok(Coerced::Array(out))
            } else {
                Err(errors)
            }
        }
        _ => coerce_scalar(def, raw, warnings)
            .map(Coerced::Scalar)
            .map_err(|msg| vec![msg]),
    }
}

fn coerce_scalar(
    def: &ParameterDefinition,
    raw: &Value,
    warnings: &mut Vec<String>,
) -> Result<SqlValue, String> {
    let value = match def.param_type {
        ParamType::String => match raw {
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Number(n) => {
                warnings.push(format!("Parameter {}: number coerced to string", def.name));
                SqlValue::Text(n.to_string())
            }
            Value::Bool(b) => {
                warnings.push(format!("Parameter {}: boolean coerced to string", def.name));
                SqlValue::Text(b.to_string())
            }
            _ => return Err(format!("Parameter {} must be a string", def.name)),
        },
        ParamType::Integer => match raw {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    warnings.push(format!("Parameter {}: float {} floored to integer", def.name, f));
                    SqlValue::Int(f.floor() as i64)
                } else {
                    return Err(format!("Parameter {} is out of integer range", def.name));
                }
            }
            Value::String(s) => {
                if let Ok(i) = s.trim().parse::<i64>() {
                    SqlValue::Int(i)
                } else if let Ok(f) = s.trim().parse::<f64>() {
                    warnings.push(format!("Parameter {}: float {} floored to integer", def.name, f));
                    SqlValue::Int(f.floor() as i64)
                } else {
                    return Err(format!("Parameter {} must be an integer, got: {s}", def.name));
                }
            }
            Value::Bool(b) => SqlValue::Int(i64::from(*b)),
            _ => return Err(format!("Parameter {} must be an integer", def.name)),
        },
        ParamType::Float => match raw {
            Value::Number(n) => SqlValue::Float(
                n.as_f64()
                    .ok_or_else(|| format!("Parameter {} is out of float range", def.name))?,
            ),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Float)
                .map_err(|_| format!("Parameter {} must be a number, got: {s}", def.name))?,
            Value::Bool(b) => SqlValue::Float(if *b { 1.0 } else { 0.0 }),
            _ => return Err(format!("Parameter {} must be a number", def.name)),
        },
        ParamType::Boolean => match raw {
            Value::Bool(b) => SqlValue::Int(i64::from(*b)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => SqlValue::Int(1),
                "false" | "0" | "no" | "off" => SqlValue::Int(0),
                _ => return Err(format!("Parameter {} must be a boolean, got: {s}", def.name)),
            },
            Value::Number(n) => SqlValue::Int(i64::from(n.as_f64() != Some(0.0))),
            _ => return Err(format!("Parameter {} must be a boolean", def.name)),
        },
        ParamType::Array => unreachable!("arrays handled by coerce()"),
    };

    check_bounds(def, &value, warnings)?;
    check_enum(def, &value)?;
    Ok(value)
}

fn check_bounds(
    def: &ParameterDefinition,
    value: &SqlValue,
    warnings: &mut Vec<String>,
) -> Result<(), String> {
    match value {
        SqlValue::Text(s) => {
            let length = s.chars().count();
            if let Some(min) = def.min_length {
                if length < min {
                    return Err(format!(
                        "Parameter {} must be at least {} characters",
                        def.name, min
                    ));
                }
            }
            if let Some(max) = def.max_length {
                if length > max {
                    return Err(format!(
                        "Parameter {} must be at most {} characters",
                        def.name, max
                    ));
                }
            }
            if let Some(pattern) = &def.pattern {
                match Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(s) {
                            return Err(format!(
                                "Parameter {} does not match pattern {}",
                                def.name, pattern
                            ));
                        }
                    }
                    Err(_) => warnings.push(format!(
                        "Parameter {}: malformed pattern {} ignored",
                        def.name, pattern
                    )),
                }
            }
        }
        SqlValue::Int(i) => {
            let v = *i as f64;
            if let Some(min) = def.min {
                if v < min {
                    return Err(format!("Parameter {} must be >= {}", def.name, min));
                }
            }
            if let Some(max) = def.max {
                if v > max {
                    return Err(format!("Parameter {} must be <= {}", def.name, max));
                }
            }
        }
        SqlValue::Float(f) => {
            if let Some(min) = def.min {
                if *f < min {
                    return Err(format!("Parameter {} must be >= {}", def.name, min));
                }
            }
            if let Some(max) = def.max {
                if *f > max {
                    return Err(format!("Parameter {} must be <= {}", def.name, max));
                }
            }
        }
    }
    Ok(())
}

fn check_enum(def: &ParameterDefinition, value: &SqlValue) -> Result<(), String> {
    let Some(allowed) = &def.enum_values else {
        return Ok(());
    };
    let as_json = value.to_json();
    let matches = allowed.iter().any(|entry| {
        entry == &as_json
            || entry.as_str().map(|s| s == value.to_string()).unwrap_or(false)
            || as_json
                .as_str()
                .map(|s| s == entry.to_string())
                .unwrap_or(false)
    });
    if matches {
        Ok(())
    } else {
        Err(format!(
            "Parameter {} must be one of: {}",
            def.name,
            allowed
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }
}

fn coerce_positional(
    values: &Value,
    definitions: &[ParameterDefinition],
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> McpResult<Vec<Coerced>> {
    let items = match values {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        // Object input pairs with definitions by declaration order.
        Value::Object(_) => {
            let mut out = Vec::new();
            for def in definitions {
                match resolve_value(def, values) {
                    Some(raw) => match coerce(def, &raw, warnings) {
                        Ok(v) => out.push(v),
                        Err(mut msgs) => errors.append(&mut msgs),
                    },
                    None if def.required => {
                        errors.push(format!("Missing required parameter: {}", def.name));
                    }
                    None => {}
                }
            }
            return Ok(out);
        }
        _ => {
            return Err(validation_error(vec![
                "Positional parameters require an array of values".to_string(),
            ]))
        }
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match definitions.get(idx) {
            Some(def) => match coerce(def, item, warnings) {
                Ok(v) => out.push(v),
                Err(mut msgs) => errors.append(&mut msgs),
            },
            None => match raw_scalar(item) {
                Some(v) => out.push(Coerced::Scalar(v)),
                None => errors.push(format!(
                    "Positional value {} has an unsupported type",
                    idx
                )),
            },
        }
    }
    for def in definitions.iter().skip(items.len()) {
        if def.required {
            errors.push(format!("Missing required parameter: {}", def.name));
        }
    }
    Ok(out)
}

/// Undeclared positional values keep their JSON type when representable.
fn raw_scalar(value: &Value) -> Option<SqlValue> {
    match value {
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(SqlValue::Int(i))
            } else {
                n.as_f64().map(SqlValue::Float)
            }
        }
        Value::Bool(b) => Some(SqlValue::Int(i64::from(*b))),
        _ => None,
    }
}

fn validation_error(messages: Vec<String>) -> McpError {
    let summary = messages.join("; ");
    McpError::validation(summary).with_details(json!({ "violations": messages }))
}
