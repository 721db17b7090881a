//! MCP tool implementations.
//!
//! Tools are polymorphic over `{input_schema, execute}`; the registry
//! stores them uniformly. YAML-declared SQL tools and the builtins
//! (describe_object, execute_sql) satisfy the same interface.

mod describe;
mod execute;
mod registry;
mod sql_tool;

pub use describe::{DescribeObjectTool, DESCRIBE_OBJECT_NAME};
pub use execute::{ExecuteSqlTool, EXECUTE_SQL_NAME};
pub use registry::ToolRegistry;
pub use sql_tool::YamlSqlTool;

use crate::protocol::{ContentBlock, ToolCallResult, ToolDefinition};
use crate::state::QueryRouter;
use async_trait::async_trait;
use db2i_db::driver::{ColumnMeta, ExecutionOutcome};
use db2i_protocol::defaults::TEXT_PREVIEW_ROWS;
use db2i_protocol::{McpError, McpResult, RequestContext};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Everything a tool needs to run one invocation.
pub struct ToolContext {
    pub router: Arc<QueryRouter>,
    /// Bearer token from the request, when the caller authenticated.
    pub auth_token: Option<String>,
    pub request: RequestContext,
}

/// Trait for MCP tools.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// JSON Schema for the structured result; SQL tools share one shape.
    fn output_schema(&self) -> Option<Value> {
        Some(run_result_schema())
    }

    async fn execute(&self, args: Value, tctx: &ToolContext) -> McpResult<ToolRunResult>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description(),
            input_schema: self.input_schema(),
            output_schema: self.output_schema(),
        }
    }
}

/// Shaped result of a tool run (C7 output contract).
#[derive(Debug, Clone)]
pub struct ToolRunResult {
    pub success: bool,
    pub data: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub columns: Vec<ColumnMeta>,
}

impl ToolRunResult {
    /// Map a driver outcome onto the tool output contract. Columns the
    /// driver left unnamed default to `column_<i>`.
    pub fn from_outcome(outcome: ExecutionOutcome) -> Self {
        let mut columns = outcome.columns;
        if columns.is_empty() {
            if let Some(first) = outcome.data.first() {
                columns = first
                    .keys()
                    .map(|name| ColumnMeta {
                        name: name.clone(),
                        type_name: "UNKNOWN".to_string(),
                        label: None,
                    })
                    .collect();
            }
        }
        for (idx, col) in columns.iter_mut().enumerate() {
            if col.name.is_empty() {
                col.name = format!("column_{idx}");
            }
        }
        Self {
            success: outcome.success,
            row_count: outcome.data.len(),
            data: outcome.data,
            execution_time_ms: outcome.execution_time_ms,
            columns,
        }
    }

    /// The typed object returned as `structuredContent`.
    pub fn to_structured(&self) -> Value {
        json!({
            "success": self.success,
            "data": self.data,
            "rowCount": self.row_count,
            "executionTime": self.execution_time_ms,
            "metadata": { "columns": self.columns },
        })
    }

    /// Human-readable half: a one-line summary followed by pretty JSON
    /// of the first rows.
    pub fn text_summary(&self, tool: &str) -> String {
        let mut text = format!(
            "{tool}: {} row(s) in {} ms\n",
            self.row_count, self.execution_time_ms
        );
        let preview: Vec<&Map<String, Value>> =
            self.data.iter().take(TEXT_PREVIEW_ROWS).collect();
        match serde_json::to_string_pretty(&preview) {
            Ok(rows) => text.push_str(&rows),
            Err(_) => text.push_str("[]"),
        }
        if self.data.len() > TEXT_PREVIEW_ROWS {
            text.push_str(&format!(
                "\n… {} more row(s) in structured content",
                self.data.len() - TEXT_PREVIEW_ROWS
            ));
        }
        text
    }

    pub fn into_call_result(self, tool: &str) -> ToolCallResult {
        ToolCallResult {
            content: vec![ContentBlock::text(self.text_summary(tool))],
            is_error: false,
            structured_content: Some(self.to_structured()),
        }
    }
}

/// Always-well-formed error shape: text plus `{code, message, details}`.
pub fn error_call_result(error: &McpError) -> ToolCallResult {
    ToolCallResult {
        content: vec![ContentBlock::text(format!("Error: {error}"))],
        is_error: true,
        structured_content: Some(error.to_structured()),
    }
}

fn run_result_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "success": { "type": "boolean" },
            "data": { "type": "array", "items": { "type": "object" } },
            "rowCount": { "type": "integer" },
            "executionTime": { "type": "integer" },
            "metadata": {
                "type": "object",
                "properties": {
                    "columns": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "type": { "type": "string" },
                                "label": { "type": "string" }
                            }
                        }
                    }
                }
            }
        },
        "required": ["success", "data", "rowCount"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnamed_columns_get_defaults() {
        let outcome = ExecutionOutcome {
            success: true,
            columns: vec![
                ColumnMeta { name: "".into(), type_name: "VARCHAR".into(), label: None },
                ColumnMeta { name: "ok".into(), type_name: "INTEGER".into(), label: None },
            ],
            is_done: true,
            ..Default::default()
        };
        let result = ToolRunResult::from_outcome(outcome);
        assert_eq!(result.columns[0].name, "column_0");
        assert_eq!(result.columns[1].name, "ok");
    }

    #[test]
    fn test_structured_shape() {
        let mut row = Map::new();
        row.insert("id".into(), json!(7));
        let outcome = ExecutionOutcome {
            success: true,
            data: vec![row],
            is_done: true,
            execution_time_ms: 12,
            ..Default::default()
        };
        let structured = ToolRunResult::from_outcome(outcome).to_structured();
        assert_eq!(structured["success"], true);
        assert_eq!(structured["rowCount"], 1);
        assert_eq!(structured["data"][0]["id"], 7);
        assert_eq!(structured["metadata"]["columns"][0]["name"], "id");
    }

    #[test]
    fn test_error_result_is_well_formed() {
        let err = McpError::validation("bad input");
        let result = error_call_result(&err);
        assert!(result.is_error);
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["code"], -32602);
        assert_eq!(structured["message"], "bad input");
    }
}
