//! execute_sql - run an arbitrary SELECT.
//!
//! Registered only when `IBMI_ENABLE_EXECUTE_SQL=true`. The statement
//! body is the single-slot direct substitution `:sql`, so the supplied
//! string becomes the runtime SQL with an empty bind vector, and the
//! read-only guard runs against exactly what will execute. An optional
//! runtime `QSYS2.PARSE_STATEMENT` gate adds a server-side syntax check.

use super::{McpTool, ToolContext, ToolRunResult};
use async_trait::async_trait;
use db2i_protocol::defaults::EXECUTE_SQL_FETCH_SIZE;
use db2i_protocol::{McpError, McpResult, RequestContext};
use db2i_sql::guard::{self, SecurityPolicy};
use db2i_sql::params::{process, ProcessOptions};
use db2i_sql::{ParamType, ParameterDefinition};
use serde_json::{json, Value};
use tracing::debug;

pub const EXECUTE_SQL_NAME: &str = "execute_sql";

const PARSE_STATEMENT_SQL: &str = "SELECT SQL_STATEMENT_TYPE FROM TABLE(QSYS2.PARSE_STATEMENT(\
     SQL_STATEMENT => ?, NAMING => '*SQL', DECIMAL_POINT => '*PERIOD', \
     SQL_STRING_DELIMITER => '*APOSTSQL')) FETCH FIRST 1 ROWS ONLY";

pub struct ExecuteSqlTool {
    policy: SecurityPolicy,
    /// Run the server-side PARSE_STATEMENT gate before executing.
    runtime_parse_check: bool,
}

impl ExecuteSqlTool {
    pub fn new(runtime_parse_check: bool) -> Self {
        Self {
            policy: SecurityPolicy::default(),
            runtime_parse_check,
        }
    }

    fn definitions(&self) -> Vec<ParameterDefinition> {
        let mut sql = ParameterDefinition::new("sql", ParamType::String).required();
        sql.description = Some("SQL SELECT statement to execute".into());
        vec![sql]
    }

    /// Server-side syntax check. Any failure of the check itself is a
    /// validation error; this gate fails closed.
    async fn parse_statement_gate(
        &self,
        sql: &str,
        tctx: &ToolContext,
        ctx: &RequestContext,
    ) -> McpResult<()> {
        let binds = [db2i_sql::SqlValue::Text(sql.to_string())];
        let outcome = tctx
            .router
            .execute(
                tctx.auth_token.as_deref(),
                PARSE_STATEMENT_SQL,
                &binds,
                ctx,
                None,
                1,
                false,
            )
            .await
            .map_err(|e| match e {
                // Pool-layer errors keep their codes; execution failures
                // of the check translate to validation failures.
                McpError::Database { message, .. } => {
                    McpError::validation(format!("PARSE_STATEMENT check failed: {message}"))
                        .with_details(json!({ "validatedBy": "parse_statement" }))
                }
                other => other,
            })?;

        let statement_type = outcome
            .data
            .first()
            .and_then(|row| row.get("SQL_STATEMENT_TYPE"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                McpError::validation("PARSE_STATEMENT returned no statement type")
                    .with_details(json!({ "validatedBy": "parse_statement" }))
            })?;

        if self.policy.read_only && statement_type != "QUERY" {
            return Err(McpError::validation(format!(
                "Statement type {statement_type} is not permitted in read-only mode"
            ))
            .with_details(json!({
                "violations": [format!("statement type: {statement_type}")],
                "validatedBy": "parse_statement",
            })));
        }
        debug!(request_id = %ctx.request_id, statement_type, "parse check passed");
        Ok(())
    }
}

#[async_trait]
impl McpTool for ExecuteSqlTool {
    fn name(&self) -> &str {
        EXECUTE_SQL_NAME
    }

    fn description(&self) -> String {
        "Execute an arbitrary SQL SELECT against the connected system (read-only)".to_string()
    }

    fn input_schema(&self) -> Value {
        super::sql_tool::schema_for_parameters(&self.definitions())
    }

    async fn execute(&self, args: Value, tctx: &ToolContext) -> McpResult<ToolRunResult> {
        let ctx = tctx.request.child(EXECUTE_SQL_NAME);

        // Single-slot direct substitution: the parameter value becomes
        // the runtime SQL, bind vector empty.
        let processed = process(":sql", &args, &self.definitions(), &ProcessOptions::default())?;

        guard::validate(&processed.sql, &self.policy)?;

        if self.runtime_parse_check {
            self.parse_statement_gate(&processed.sql, tctx, &ctx).await?;
        }

        let outcome = tctx
            .router
            .execute(
                tctx.auth_token.as_deref(),
                &processed.sql,
                &processed.params,
                &ctx,
                Some(&self.policy),
                EXECUTE_SQL_FETCH_SIZE,
                true,
            )
            .await?;

        Ok(ToolRunResult::from_outcome(outcome))
    }
}
