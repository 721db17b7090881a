//! Toolset membership queries.
//!
//! Holds an immutable-after-init snapshot of the toolset registry; hot
//! reload replaces the whole manager atomically. Global tools (the DDL
//! describer, and execute_sql when enabled) are appended to every
//! toolset's effective membership as a derived relation.

use crate::schema::{ToolsFile, ToolsetConfig};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize)]
pub struct ToolsetStats {
    pub total_toolsets: usize,
    pub total_tools: usize,
    /// Tools belonging to more than one toolset.
    pub multi_toolset_tools: usize,
    pub toolset_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct ToolsetManager {
    toolsets: BTreeMap<String, ToolsetConfig>,
    tool_to_sets: HashMap<String, Vec<String>>,
    global_tools: Vec<String>,
}

impl ToolsetManager {
    pub fn new(config: &ToolsFile, global_tools: Vec<String>) -> Self {
        let mut tool_to_sets: HashMap<String, Vec<String>> = HashMap::new();
        for (set_name, set) in &config.toolsets {
            for tool in &set.tools {
                tool_to_sets
                    .entry(tool.clone())
                    .or_default()
                    .push(set_name.clone());
            }
        }
        Self {
            toolsets: config.toolsets.clone(),
            tool_to_sets,
            global_tools,
        }
    }

    pub fn toolset_names(&self) -> Vec<String> {
        self.toolsets.keys().cloned().collect()
    }

    pub fn toolset(&self, name: &str) -> Option<&ToolsetConfig> {
        self.toolsets.get(name)
    }

    /// Effective members of a toolset: declared tools plus globals.
    pub fn tools_in_toolset(&self, name: &str) -> Option<Vec<String>> {
        let set = self.toolsets.get(name)?;
        let mut members = set.tools.clone();
        for global in &self.global_tools {
            if !members.iter().any(|t| t == global) {
                members.push(global.clone());
            }
        }
        Some(members)
    }

    pub fn toolsets_for_tool(&self, tool: &str) -> Vec<String> {
        if self.global_tools.iter().any(|g| g == tool) {
            return self.toolset_names();
        }
        self.tool_to_sets.get(tool).cloned().unwrap_or_default()
    }

    pub fn is_tool_in_toolset(&self, tool: &str, toolset: &str) -> bool {
        self.tools_in_toolset(toolset)
            .map(|members| members.iter().any(|t| t == tool))
            .unwrap_or(false)
    }

    /// Tool names admitted by a `--toolsets` filter; `None` means no
    /// filter (everything registers).
    pub fn filter_tools(&self, selected: &[String]) -> Vec<String> {
        let mut admitted = Vec::new();
        for name in selected {
            if let Some(mut members) = self.tools_in_toolset(name) {
                admitted.append(&mut members);
            }
        }
        admitted.sort();
        admitted.dedup();
        admitted
    }

    pub fn stats(&self) -> ToolsetStats {
        let toolset_counts: BTreeMap<String, usize> = self
            .toolsets
            .iter()
            .map(|(name, set)| (name.clone(), set.tools.len() + self.global_tools.len()))
            .collect();
        ToolsetStats {
            total_toolsets: self.toolsets.len(),
            total_tools: self.tool_to_sets.len(),
            multi_toolset_tools: self
                .tool_to_sets
                .values()
                .filter(|sets| sets.len() > 1)
                .count(),
            toolset_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ToolsFile {
        serde_yaml::from_str(
            r#"
toolsets:
  users:
    title: Users
    tools: [get_user, list_users]
  perf:
    title: Performance
    tools: [active_jobs, get_user]
"#,
        )
        .unwrap()
    }

    fn manager() -> ToolsetManager {
        ToolsetManager::new(&config(), vec!["describe_object".into()])
    }

    #[test]
    fn test_globals_appended_to_every_toolset() {
        let mgr = manager();
        let users = mgr.tools_in_toolset("users").unwrap();
        assert!(users.contains(&"describe_object".to_string()));
        let perf = mgr.tools_in_toolset("perf").unwrap();
        assert!(perf.contains(&"describe_object".to_string()));
    }

    #[test]
    fn test_membership_queries() {
        let mgr = manager();
        assert!(mgr.is_tool_in_toolset("get_user", "users"));
        assert!(mgr.is_tool_in_toolset("get_user", "perf"));
        assert!(!mgr.is_tool_in_toolset("active_jobs", "users"));
        assert!(mgr.is_tool_in_toolset("describe_object", "users"));

        let mut sets = mgr.toolsets_for_tool("get_user");
        sets.sort();
        assert_eq!(sets, vec!["perf", "users"]);
        assert_eq!(mgr.toolsets_for_tool("describe_object").len(), 2);
    }

    #[test]
    fn test_filter() {
        let mgr = manager();
        let admitted = mgr.filter_tools(&["users".to_string()]);
        assert_eq!(admitted, vec!["describe_object", "get_user", "list_users"]);
        assert!(mgr.filter_tools(&["missing".to_string()]).is_empty());
    }

    #[test]
    fn test_stats() {
        let stats = manager().stats();
        assert_eq!(stats.total_toolsets, 2);
        assert_eq!(stats.total_tools, 3);
        assert_eq!(stats.multi_toolset_tools, 1);
        assert_eq!(stats.toolset_counts["users"], 3);
    }
}
