//! Tool registry: discovery and dispatch by name.

use super::{DescribeObjectTool, ExecuteSqlTool, McpTool, YamlSqlTool};
use crate::protocol::ToolDefinition;
use db2i_tools::{ParsingResult, ToolsetManager};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn McpTool>>,
}

impl ToolRegistry {
    /// Build the registry from a parsed configuration.
    ///
    /// `toolset_filter` restricts registration to tools belonging to at
    /// least one selected toolset; builtins always register.
    pub fn build(
        parsing: &ParsingResult,
        toolsets: &ToolsetManager,
        toolset_filter: Option<&[String]>,
        enable_execute_sql: bool,
        execute_sql_parse_check: bool,
    ) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        let admitted = toolset_filter.map(|selected| toolsets.filter_tools(selected));

        for tool in &parsing.tools {
            if let Some(admitted) = &admitted {
                if !admitted.iter().any(|name| name == &tool.name) {
                    debug!(tool = %tool.name, "excluded by toolset filter");
                    continue;
                }
            }
            registry.register(Arc::new(YamlSqlTool::new(tool)));
        }

        registry.register(Arc::new(DescribeObjectTool));
        if enable_execute_sql {
            registry.register(Arc::new(ExecuteSqlTool::new(execute_sql_parse_check)));
        }

        debug!(count = registry.tools.len(), "tool registry built");
        registry
    }

    fn register(&mut self, tool: Arc<dyn McpTool>) {
        debug!(tool = %tool.name(), "registering tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db2i_tools::parse_config;
    use std::collections::HashMap as Env;

    const CONFIG: &str = r#"
sources:
  ibmi: { host: h, user: u, password: p }
tools:
  get_user:
    source: ibmi
    statement: SELECT * FROM qsys2.user_info_basic WHERE authorization_name = :username
    parameters:
      - { name: username, type: string, required: true }
  active_jobs:
    source: ibmi
    statement: SELECT * FROM TABLE(qsys2.active_job_info()) x
toolsets:
  users:
    title: Users
    tools: [get_user]
"#;

    fn build(filter: Option<&[String]>, execute_sql: bool) -> ToolRegistry {
        let parsing = parse_config(CONFIG, &Env::new(), &["describe_object"]);
        assert!(parsing.ok(), "{:?}", parsing.errors);
        let toolsets = ToolsetManager::new(&parsing.config, vec!["describe_object".into()]);
        ToolRegistry::build(&parsing, &toolsets, filter, execute_sql, false)
    }

    #[test]
    fn test_registers_yaml_tools_and_builtins() {
        let registry = build(None, true);
        assert!(registry.has("get_user"));
        assert!(registry.has("active_jobs"));
        assert!(registry.has("describe_object"));
        assert!(registry.has("execute_sql"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_execute_sql_off_by_default() {
        let registry = build(None, false);
        assert!(!registry.has("execute_sql"));
    }

    #[test]
    fn test_toolset_filter() {
        let filter = vec!["users".to_string()];
        let registry = build(Some(&filter), false);
        assert!(registry.has("get_user"));
        assert!(!registry.has("active_jobs"), "filtered out by toolset");
        assert!(registry.has("describe_object"), "globals always register");
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = build(None, true);
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
