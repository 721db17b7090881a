//! describe_object - DDL and column metadata for a named object.
//!
//! Queries the QSYS2 catalog with the larger DDL fetch size. Registered
//! as a global tool: it joins every toolset's effective membership.

use super::{McpTool, ToolContext, ToolRunResult};
use async_trait::async_trait;
use db2i_protocol::defaults::DDL_FETCH_SIZE;
use db2i_protocol::{McpError, McpResult};
use db2i_sql::guard::SecurityPolicy;
use db2i_sql::SqlValue;
use serde_json::{json, Value};

pub const DESCRIBE_OBJECT_NAME: &str = "describe_object";

const COLUMNS_SQL: &str = "SELECT c.column_name, c.data_type, c.length, c.numeric_scale, \
     c.is_nullable, c.column_default, c.column_text \
     FROM qsys2.syscolumns c \
     WHERE c.table_schema = ? AND c.table_name = ? \
     ORDER BY c.ordinal_position";

pub struct DescribeObjectTool;

#[async_trait]
impl McpTool for DescribeObjectTool {
    fn name(&self) -> &str {
        DESCRIBE_OBJECT_NAME
    }

    fn description(&self) -> String {
        "Describe a database object: column names, types, nullability, and text".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "library": {
                    "type": "string",
                    "description": "Schema (library) containing the object"
                },
                "object": {
                    "type": "string",
                    "description": "Table, view, or alias name"
                }
            },
            "required": ["library", "object"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, tctx: &ToolContext) -> McpResult<ToolRunResult> {
        let library = required_string(&args, "library")?;
        let object = required_string(&args, "object")?;

        let ctx = tctx.request.child(DESCRIBE_OBJECT_NAME);
        let binds = [
            SqlValue::Text(library.to_ascii_uppercase()),
            SqlValue::Text(object.to_ascii_uppercase()),
        ];

        let outcome = tctx
            .router
            .execute(
                tctx.auth_token.as_deref(),
                COLUMNS_SQL,
                &binds,
                &ctx,
                Some(&SecurityPolicy::default()),
                DDL_FETCH_SIZE,
                true,
            )
            .await?;

        Ok(ToolRunResult::from_outcome(outcome))
    }
}

fn required_string(args: &Value, field: &str) -> McpResult<String> {
    match args.get(field).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(McpError::validation(format!(
            "Missing required parameter: {field}"
        ))),
    }
}
