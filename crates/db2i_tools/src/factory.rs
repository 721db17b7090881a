//! Tool factory: load YAML files, interpolate, validate, and emit
//! processed tools.
//!
//! `--tools` accepts a single file, a directory (every `*.yaml`/`*.yml`
//! inside, sorted), or a comma-separated list of paths. Multiple files
//! merge into one configuration; toolset membership validation is
//! deferred until after the merge.

use crate::interpolate::interpolate_env;
use crate::schema::{SourceConfig, ToolConfig, ToolsFile};
use db2i_protocol::{McpError, McpResult};
use db2i_sql::params::is_valid_parameter_name;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A validated, executable tool emitted by the factory.
#[derive(Debug, Clone)]
pub struct ProcessedTool {
    pub name: String,
    pub config: ToolConfig,
    pub source: SourceConfig,
    /// Toolsets this tool belongs to.
    pub toolsets: Vec<String>,
    pub metadata: ToolMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct ToolMetadata {
    pub domain: Option<String>,
    pub category: Option<String>,
}

/// Outcome of a configuration load; validation failures aggregate into
/// `errors` rather than failing fast.
#[derive(Debug, Default)]
pub struct ParsingResult {
    pub config: ToolsFile,
    pub tools: Vec<ProcessedTool>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ParsingResult {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a configuration error when validation failed.
    pub fn into_result(self) -> McpResult<Self> {
        if self.ok() {
            Ok(self)
        } else {
            Err(
                McpError::configuration(format!(
                    "Tools configuration invalid: {}",
                    self.errors.join("; ")
                ))
                .with_details(serde_json::json!({ "errors": self.errors })),
            )
        }
    }
}

/// Load tools from a path spec: file, directory, or comma-separated
/// list. `global_tools` participate in toolset membership validation.
pub fn load_tools(
    spec: &str,
    env: &HashMap<String, String>,
    global_tools: &[&str],
) -> McpResult<ParsingResult> {
    let paths = resolve_paths(spec)?;
    if paths.is_empty() {
        return Err(McpError::configuration(format!(
            "No tools configuration found at: {spec}"
        )));
    }

    let mut merged = ToolsFile::default();
    let mut errors = Vec::new();
    for path in &paths {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            McpError::configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        let interpolated = interpolate_env(&raw, env);
        match serde_yaml::from_str::<ToolsFile>(&interpolated) {
            Ok(file) => merge_into(&mut merged, file, path, &mut errors),
            Err(e) => errors.push(format!("{}: {e}", path.display())),
        }
    }

    let mut result = process(merged, global_tools);
    result.errors.splice(0..0, errors);
    info!(
        files = paths.len(),
        tools = result.tools.len(),
        errors = result.errors.len(),
        "tools configuration loaded"
    );
    Ok(result)
}

/// Parse a single YAML string (testable seam behind [`load_tools`]).
pub fn parse_config(
    raw: &str,
    env: &HashMap<String, String>,
    global_tools: &[&str],
) -> ParsingResult {
    let interpolated = interpolate_env(raw, env);
    match serde_yaml::from_str::<ToolsFile>(&interpolated) {
        Ok(file) => process(file, global_tools),
        Err(e) => ParsingResult {
            errors: vec![format!("YAML parse error: {e}")],
            ..Default::default()
        },
    }
}

fn resolve_paths(spec: &str) -> McpResult<Vec<PathBuf>> {
    if spec.contains(',') {
        return Ok(spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect());
    }

    let path = Path::new(spec);
    if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| McpError::configuration(format!("Failed to read {}: {e}", path.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        files.sort();
        return Ok(files);
    }

    if path.is_file() {
        Ok(vec![path.to_path_buf()])
    } else {
        Ok(Vec::new())
    }
}

fn merge_into(merged: &mut ToolsFile, file: ToolsFile, path: &Path, errors: &mut Vec<String>) {
    for (name, source) in file.sources {
        if merged.sources.insert(name.clone(), source).is_some() {
            errors.push(format!("{}: duplicate source: {name}", path.display()));
        }
    }
    for (name, tool) in file.tools {
        if merged.tools.insert(name.clone(), tool).is_some() {
            errors.push(format!("{}: duplicate tool: {name}", path.display()));
        }
    }
    for (name, toolset) in file.toolsets {
        if merged.toolsets.insert(name.clone(), toolset).is_some() {
            errors.push(format!("{}: duplicate toolset: {name}", path.display()));
        }
    }
}

fn process(config: ToolsFile, global_tools: &[&str]) -> ParsingResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Pass 2: every tool.source resolves.
    for (name, tool) in &config.tools {
        if !config.sources.contains_key(&tool.source) {
            errors.push(format!("Tool {name}: unknown source: {}", tool.source));
        }
        // Pass 3: non-empty statement.
        if tool.statement.trim().is_empty() {
            errors.push(format!("Tool {name}: statement is empty"));
        }
        // Pass 5: parameter uniqueness and name pattern.
        let mut seen = std::collections::HashSet::new();
        for param in &tool.parameters {
            if !is_valid_parameter_name(&param.name) {
                errors.push(format!("Tool {name}: invalid parameter name: {}", param.name));
            }
            if !seen.insert(param.name.as_str()) {
                errors.push(format!("Tool {name}: duplicate parameter: {}", param.name));
            }
        }
    }

    // Pass 4 (post-merge): toolset members resolve in tools ∪ globals.
    for (set_name, toolset) in &config.toolsets {
        for member in &toolset.tools {
            if !config.tools.contains_key(member)
                && !global_tools.contains(&member.as_str())
            {
                errors.push(format!("Toolset {set_name}: unknown tool: {member}"));
            }
        }
    }

    let mut tools = Vec::new();
    for (name, tool) in &config.tools {
        if !tool.enabled {
            debug!(tool = %name, "disabled tool skipped");
            warnings.push(format!("Tool {name} is disabled"));
            continue;
        }
        let Some(source) = config.sources.get(&tool.source) else {
            continue;
        };
        let toolsets: Vec<String> = config
            .toolsets
            .iter()
            .filter(|(_, set)| set.tools.iter().any(|t| t == name))
            .map(|(set_name, _)| set_name.clone())
            .collect();
        tools.push(ProcessedTool {
            name: name.clone(),
            config: tool.clone(),
            source: source.clone(),
            toolsets,
            metadata: ToolMetadata {
                domain: tool.domain.clone(),
                category: tool.category.clone(),
            },
        });
    }

    ParsingResult {
        config,
        tools,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    const VALID: &str = r#"
sources:
  ibmi:
    host: ${IBMI_HOST}
    user: TESTUSER
    password: ${IBMI_PASS}

tools:
  get_user:
    source: ibmi
    statement: SELECT * FROM qsys2.user_info_basic WHERE authorization_name = :username
    parameters:
      - name: username
        type: string
        required: true
  old_tool:
    source: ibmi
    statement: SELECT 1 FROM sysibm.sysdummy1
    enabled: false

toolsets:
  users:
    title: Users
    tools: [get_user, describe_object]
"#;

    #[test]
    fn test_valid_config_processes() {
        let result = parse_config(
            VALID,
            &env(&[("IBMI_HOST", "ibmi.example.com"), ("IBMI_PASS", "pw")]),
            &["describe_object"],
        );
        assert!(result.ok(), "errors: {:?}", result.errors);
        assert_eq!(result.tools.len(), 1, "disabled tool must be skipped");
        assert_eq!(result.tools[0].name, "get_user");
        assert_eq!(result.tools[0].source.host, "ibmi.example.com");
        assert_eq!(result.tools[0].toolsets, vec!["users"]);
        assert!(result.warnings.iter().any(|w| w.contains("old_tool")));
    }

    #[test]
    fn test_unknown_source_is_error() {
        let yaml = r#"
tools:
  broken:
    source: nowhere
    statement: SELECT 1 FROM sysibm.sysdummy1
"#;
        let result = parse_config(yaml, &env(&[]), &[]);
        assert!(!result.ok());
        assert!(result.errors[0].contains("unknown source"));
    }

    #[test]
    fn test_empty_statement_is_error() {
        let yaml = r#"
sources:
  s: { host: h, user: u, password: p }
tools:
  blank:
    source: s
    statement: "   "
"#;
        let result = parse_config(yaml, &env(&[]), &[]);
        assert!(result.errors.iter().any(|e| e.contains("statement is empty")));
    }

    #[test]
    fn test_duplicate_parameter_is_error() {
        let yaml = r#"
sources:
  s: { host: h, user: u, password: p }
tools:
  dup:
    source: s
    statement: SELECT 1 FROM sysibm.sysdummy1 WHERE a = :x
    parameters:
      - { name: x, type: string }
      - { name: x, type: integer }
"#;
        let result = parse_config(yaml, &env(&[]), &[]);
        assert!(result.errors.iter().any(|e| e.contains("duplicate parameter")));
    }

    #[test]
    fn test_bad_parameter_name_is_error() {
        let yaml = r#"
sources:
  s: { host: h, user: u, password: p }
tools:
  bad:
    source: s
    statement: SELECT 1 FROM sysibm.sysdummy1
    parameters:
      - { name: "1bad", type: string }
"#;
        let result = parse_config(yaml, &env(&[]), &[]);
        assert!(result.errors.iter().any(|e| e.contains("invalid parameter name")));
    }

    #[test]
    fn test_toolset_member_must_resolve() {
        let yaml = r#"
toolsets:
  ghost:
    title: Ghost
    tools: [does_not_exist]
"#;
        let result = parse_config(yaml, &env(&[]), &["describe_object"]);
        assert!(result.errors.iter().any(|e| e.contains("unknown tool")));
    }

    #[test]
    fn test_load_from_file_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let file_a = dir.path().join("a.yaml");
        let file_b = dir.path().join("b.yaml");
        std::fs::File::create(&file_a)
            .unwrap()
            .write_all(b"sources:\n  s: { host: h, user: u, password: p }\n")
            .unwrap();
        std::fs::File::create(&file_b)
            .unwrap()
            .write_all(
                b"tools:\n  t:\n    source: s\n    statement: SELECT 1 FROM sysibm.sysdummy1\n",
            )
            .unwrap();

        // Directory form merges both files.
        let result = load_tools(dir.path().to_str().unwrap(), &env(&[]), &[]).unwrap();
        assert!(result.ok(), "errors: {:?}", result.errors);
        assert_eq!(result.tools.len(), 1);

        // CSV form behaves the same.
        let spec = format!("{},{}", file_a.display(), file_b.display());
        let result = load_tools(&spec, &env(&[]), &[]).unwrap();
        assert!(result.ok());
        assert_eq!(result.tools.len(), 1);
    }

    #[test]
    fn test_missing_path_is_configuration_error() {
        let err = load_tools("/nonexistent/tools.yaml", &env(&[]), &[]).unwrap_err();
        assert!(matches!(err, McpError::Configuration { .. }));
    }
}
