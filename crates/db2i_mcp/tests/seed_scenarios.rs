//! End-to-end scenarios over the in-memory driver: tool calls flow
//! through parameter processing, the security validator, and pool
//! dispatch exactly as they do against a live system.

use db2i_db::testing::MemoryDriver;
use db2i_mcp::protocol::{JsonRpcRequest, RequestId, JSONRPC_VERSION};
use db2i_mcp::{AppState, McpServer};
use db2i_protocol::{PoolSizing, ServerConfig};
use db2i_tools::parse_config;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

const CONFIG: &str = r#"
sources:
  ibmi: { host: ibmi.example.com, user: TESTUSER, password: pw }

tools:
  get_user:
    source: ibmi
    description: Look up a user profile
    statement: SELECT * FROM qsys2.user_info_basic WHERE authorization_name = :username
    parameters:
      - { name: username, type: string, required: true, pattern: "^[A-Z0-9_]{1,10}$" }

  users_by_ids:
    source: ibmi
    statement: SELECT * FROM users WHERE id IN (:userIds) AND status = :status
    parameters:
      - { name: userIds, type: array, itemType: integer, required: true }
      - { name: status, type: string, required: true }

  audit_insert:
    source: ibmi
    statement: INSERT INTO audit(x) VALUES(1)

  literal_drop:
    source: ibmi
    statement: SELECT 'DROP TABLE X' AS txt FROM sysibm.sysdummy1
    security:
      forbiddenKeywords: [DROP]

  keyword_drop:
    source: ibmi
    statement: DROP TABLE users
    security:
      readOnly: false
      forbiddenKeywords: [DROP]

toolsets:
  users:
    title: Users
    tools: [get_user, users_by_ids]
"#;

fn build(driver: MemoryDriver, enable_execute_sql: bool) -> Arc<AppState> {
    let config = ServerConfig {
        enable_execute_sql,
        ..ServerConfig::default()
    };
    let parsing = parse_config(CONFIG, &HashMap::new(), &["describe_object", "execute_sql"]);
    assert!(parsing.ok(), "config errors: {:?}", parsing.errors);
    AppState::build(config, Arc::new(driver), parsing, None).unwrap()
}

fn call(name: &str, arguments: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.into(),
        id: Some(RequestId::Number(1)),
        method: "tools/call".into(),
        params: Some(json!({ "name": name, "arguments": arguments })),
    }
}

fn user_row() -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("AUTHORIZATION_NAME".into(), json!("TESTUSER"));
    row.insert("STATUS".into(), json!("*ENABLED"));
    row
}

#[tokio::test]
async fn named_parameter_select() {
    let driver = MemoryDriver::new().with_default_rows(vec![user_row()]);
    let server = McpServer::new(build(driver.clone(), false), None);

    let response = server
        .handle(call("get_user", json!({ "username": "TESTUSER" })))
        .await
        .unwrap();
    assert!(response.error.is_none());
    let structured = response.result.unwrap()["structuredContent"].clone();
    assert_eq!(structured["success"], true);
    assert_eq!(structured["rowCount"], 1);
    assert_eq!(structured["data"][0]["AUTHORIZATION_NAME"], "TESTUSER");

    let (sql, binds) = driver.executed().pop().unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM qsys2.user_info_basic WHERE authorization_name = ?"
    );
    assert_eq!(binds, vec![db2i_sql::SqlValue::Text("TESTUSER".into())]);
}

#[tokio::test]
async fn array_expansion() {
    let driver = MemoryDriver::new();
    let server = McpServer::new(build(driver.clone(), false), None);

    let response = server
        .handle(call(
            "users_by_ids",
            json!({ "userIds": [1, 2, 3], "status": "active" }),
        ))
        .await
        .unwrap();
    assert!(response.error.is_none());

    let (sql, binds) = driver.executed().pop().unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM users WHERE id IN (?, ?, ?) AND status = ?"
    );
    assert_eq!(binds.len(), 4);
    assert_eq!(binds[0], db2i_sql::SqlValue::Int(1));
    assert_eq!(binds[3], db2i_sql::SqlValue::Text("active".into()));
}

#[tokio::test]
async fn read_only_rejects_insert() {
    let driver = MemoryDriver::new();
    let server = McpServer::new(build(driver.clone(), false), None);

    let response = server.handle(call("audit_insert", json!({}))).await.unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    let details = &result["structuredContent"]["details"];
    let violations = details["violations"].as_array().unwrap();
    assert!(violations
        .iter()
        .any(|v| v.as_str().unwrap().contains("INSERT")));
    assert!(driver.executed().is_empty(), "rejected SQL must not reach the driver");
}

#[tokio::test]
async fn literal_vs_keyword_discrimination() {
    let driver = MemoryDriver::new();
    let server = McpServer::new(build(driver.clone(), false), None);

    // 'DROP TABLE X' inside a string literal is not a keyword.
    let response = server.handle(call("literal_drop", json!({}))).await.unwrap();
    let result = response.result.unwrap();
    assert_ne!(result["isError"], true, "literal must pass: {result}");

    // A bare DROP statement trips the forbidden keyword check even with
    // read-only disabled.
    let response = server.handle(call("keyword_drop", json!({}))).await.unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    let violations = result["structuredContent"]["details"]["violations"]
        .as_array()
        .unwrap();
    assert!(violations
        .iter()
        .any(|v| v.as_str().unwrap() == "Forbidden keyword: DROP"));
}

#[tokio::test]
async fn fail_closed_on_unparseable_sql() {
    let driver = MemoryDriver::new();
    let server = McpServer::new(build(driver.clone(), true), None);

    let response = server
        .handle(call("execute_sql", json!({ "sql": "SELECT * FROM WHERE" })))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    let violations = result["structuredContent"]["details"]["violations"]
        .as_array()
        .unwrap();
    assert!(violations
        .iter()
        .any(|v| v.as_str().unwrap() == "SQL parsing failed (cannot validate read-only safely)"));
    assert!(driver.executed().is_empty());
}

#[tokio::test]
async fn execute_sql_runs_selects() {
    let driver = MemoryDriver::new().with_default_rows(vec![user_row()]);
    let server = McpServer::new(build(driver.clone(), true), None);

    let response = server
        .handle(call(
            "execute_sql",
            json!({ "sql": "SELECT * FROM qsys2.user_info_basic" }),
        ))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_ne!(result["isError"], true, "{result}");
    assert_eq!(result["structuredContent"]["rowCount"], 1);

    let (sql, binds) = driver.executed().pop().unwrap();
    assert_eq!(sql, "SELECT * FROM qsys2.user_info_basic");
    assert!(binds.is_empty(), "direct substitution binds nothing");
}

fn parse_statement_row(statement_type: &str) -> db2i_db::driver::ExecutionOutcome {
    let mut row = Map::new();
    row.insert("SQL_STATEMENT_TYPE".into(), json!(statement_type));
    db2i_db::driver::ExecutionOutcome {
        success: true,
        has_results: true,
        is_done: true,
        data: vec![row],
        sql_rc: 0,
        sql_state: Some("00000".into()),
        execution_time_ms: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn parse_statement_gate_accepts_queries_and_rejects_others() {
    let config = ServerConfig {
        enable_execute_sql: true,
        execute_sql_parse_check: true,
        ..ServerConfig::default()
    };
    let parsing = parse_config(CONFIG, &HashMap::new(), &["describe_object", "execute_sql"]);
    let driver = MemoryDriver::new();
    let state = AppState::build(config, Arc::new(driver.clone()), parsing, None).unwrap();
    let server = McpServer::new(state, None);

    // Gate passes for a QUERY verdict; the real statement then runs.
    driver.push_response(parse_statement_row("QUERY"));
    let response = server
        .handle(call(
            "execute_sql",
            json!({ "sql": "SELECT * FROM qsys2.services_info" }),
        ))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_ne!(result["isError"], true, "{result}");
    let executed = driver.executed();
    assert!(executed[0].0.contains("QSYS2.PARSE_STATEMENT"));
    assert_eq!(executed[1].0, "SELECT * FROM qsys2.services_info");

    // A non-QUERY verdict fails closed before execution.
    driver.push_response(parse_statement_row("DDL"));
    let before = driver.executed().len();
    let response = server
        .handle(call(
            "execute_sql",
            json!({ "sql": "SELECT * FROM qsys2.services_info" }),
        ))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(
        result["structuredContent"]["details"]["validatedBy"],
        "parse_statement"
    );
    // Only the gate query ran this time.
    assert_eq!(driver.executed().len(), before + 1);
}

#[tokio::test]
async fn token_routing_to_authenticated_pool() {
    let driver = MemoryDriver::new().with_default_rows(vec![user_row()]);
    let state = build(driver.clone(), false);

    let credentials = db2i_protocol::IbmiCredentials {
        host: "ibmi.example.com".into(),
        port: 8076,
        user: "AUTHUSER".into(),
        password: "pw".into(),
        ignore_unauthorized: false,
    };
    let session = state
        .tokens
        .create_session(credentials.clone(), Some(3600), PoolSizing::default())
        .unwrap();
    state
        .auth_pools
        .create_pool(&session.token, credentials, PoolSizing::default())
        .await
        .unwrap();

    let server = McpServer::new(Arc::clone(&state), Some(session.token.clone()));
    let response = server
        .handle(call("get_user", json!({ "username": "AUTHUSER" })))
        .await
        .unwrap();
    assert_ne!(response.result.unwrap()["isError"], true);
    assert_eq!(state.auth_pools.pool_count().await, 1);

    // Revocation: the same server instance now fails Unauthorized.
    state.tokens.remove_token(&session.token);
    let response = server
        .handle(call("get_user", json!({ "username": "AUTHUSER" })))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(result["structuredContent"]["code"], -32001);
}

#[tokio::test]
async fn describe_object_uses_catalog() {
    let driver = MemoryDriver::new();
    let server = McpServer::new(build(driver.clone(), false), None);

    let response = server
        .handle(call(
            "describe_object",
            json!({ "library": "qsys2", "object": "user_info_basic" }),
        ))
        .await
        .unwrap();
    assert!(response.error.is_none());

    let (sql, binds) = driver.executed().pop().unwrap();
    assert!(sql.contains("qsys2.syscolumns"));
    assert_eq!(
        binds,
        vec![
            db2i_sql::SqlValue::Text("QSYS2".into()),
            db2i_sql::SqlValue::Text("USER_INFO_BASIC".into()),
        ]
    );
}
