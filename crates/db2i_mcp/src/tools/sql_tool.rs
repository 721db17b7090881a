//! YAML-declared SQL tool: the tool invocation runtime.
//!
//! Each call validates input, rewrites parameters, runs the security
//! validator on the rewritten SQL, dispatches to the routed pool, and
//! shapes the driver result.

use super::{McpTool, ToolContext, ToolRunResult};
use async_trait::async_trait;
use db2i_protocol::defaults::DEFAULT_FETCH_SIZE;
use db2i_protocol::{McpError, McpResult};
use db2i_sql::guard::{self, SecurityPolicy};
use db2i_sql::params::{process, ProcessOptions};
use db2i_sql::{ParamType, ParameterDefinition};
use db2i_tools::ProcessedTool;
use serde_json::{json, Map, Value};
use tracing::debug;

pub struct YamlSqlTool {
    name: String,
    description: String,
    statement: String,
    definitions: Vec<ParameterDefinition>,
    policy: SecurityPolicy,
}

impl YamlSqlTool {
    pub fn new(tool: &ProcessedTool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool
                .config
                .description
                .clone()
                .unwrap_or_else(|| format!("SQL tool {}", tool.name)),
            statement: tool.config.statement.trim().to_string(),
            definitions: tool.config.parameters.clone(),
            policy: tool.config.policy(),
        }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// The input schema declares `additionalProperties: false`; enforce it.
    fn reject_unknown_arguments(&self, args: &Value) -> McpResult<()> {
        let Value::Object(map) = args else {
            return Ok(());
        };
        let unknown: Vec<String> = map
            .keys()
            .filter(|key| !self.definitions.iter().any(|d| &d.name == *key))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(
                McpError::validation(format!("Unknown arguments: {}", unknown.join(", ")))
                    .with_details(json!({ "unknownArguments": unknown })),
            )
        }
    }
}

#[async_trait]
impl McpTool for YamlSqlTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn input_schema(&self) -> Value {
        schema_for_parameters(&self.definitions)
    }

    async fn execute(&self, args: Value, tctx: &ToolContext) -> McpResult<ToolRunResult> {
        let args = normalize_args(args)?;
        self.reject_unknown_arguments(&args)?;
        let ctx = tctx.request.child(&self.name);

        let processed = process(
            &self.statement,
            &args,
            &self.definitions,
            &ProcessOptions::default(),
        )?;
        for warning in &processed.warnings {
            debug!(tool = %self.name, request_id = %ctx.request_id, "{warning}");
        }

        // Validate the post-rewrite SQL; the pool re-checks with the same
        // policy on its own call site.
        guard::validate(&processed.sql, &self.policy)?;

        let outcome = tctx
            .router
            .execute(
                tctx.auth_token.as_deref(),
                &processed.sql,
                &processed.params,
                &ctx,
                Some(&self.policy),
                DEFAULT_FETCH_SIZE,
                true,
            )
            .await?;

        Ok(ToolRunResult::from_outcome(outcome))
    }
}

/// Arguments must be a JSON object (absent params allowed).
fn normalize_args(args: Value) -> McpResult<Value> {
    match args {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) | Value::Array(_) => Ok(args),
        other => Err(McpError::invalid_request(format!(
            "Tool arguments must be an object, got: {other}"
        ))),
    }
}

/// Emit the JSON Schema for a parameter list.
pub fn schema_for_parameters(definitions: &[ParameterDefinition]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for def in definitions {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(def.param_type.json_schema_type()));
        if let Some(description) = &def.description {
            prop.insert("description".into(), json!(description));
        }
        if let Some(default) = &def.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(enum_values) = &def.enum_values {
            prop.insert("enum".into(), json!(enum_values));
        }
        match def.param_type {
            ParamType::String => {
                if let Some(min) = def.min_length {
                    prop.insert("minLength".into(), json!(min));
                }
                if let Some(max) = def.max_length {
                    prop.insert("maxLength".into(), json!(max));
                }
                if let Some(pattern) = &def.pattern {
                    prop.insert("pattern".into(), json!(pattern));
                }
            }
            ParamType::Integer | ParamType::Float => {
                if let Some(min) = def.min {
                    prop.insert("minimum".into(), json!(min));
                }
                if let Some(max) = def.max {
                    prop.insert("maximum".into(), json!(max));
                }
            }
            ParamType::Array => {
                let item_type = def.item_type.unwrap_or(ParamType::String);
                prop.insert(
                    "items".into(),
                    json!({ "type": item_type.json_schema_type() }),
                );
                if let Some(min) = def.min_length {
                    prop.insert("minItems".into(), json!(min));
                }
                if let Some(max) = def.max_length {
                    prop.insert("maxItems".into(), json!(max));
                }
            }
            ParamType::Boolean => {}
        }
        if def.required {
            required.push(json!(def.name));
        }
        properties.insert(def.name.clone(), Value::Object(prop));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use db2i_sql::ParameterDefinition;

    #[test]
    fn test_schema_emission() {
        let mut username = ParameterDefinition::new("username", ParamType::String).required();
        username.pattern = Some("^[A-Z0-9_]{1,10}$".into());
        username.max_length = Some(10);
        let mut ids = ParameterDefinition::new("ids", ParamType::Array);
        ids.item_type = Some(ParamType::Integer);

        let schema = schema_for_parameters(&[username, ids]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["username"]["type"], "string");
        assert_eq!(schema["properties"]["username"]["maxLength"], 10);
        assert_eq!(schema["properties"]["ids"]["items"]["type"], "integer");
        assert_eq!(schema["required"][0], "username");
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn test_normalize_args() {
        assert!(normalize_args(Value::Null).unwrap().is_object());
        assert!(normalize_args(json!({"a": 1})).is_ok());
        assert!(normalize_args(json!("nope")).is_err());
    }
}
