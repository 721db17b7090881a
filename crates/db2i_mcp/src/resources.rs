//! Toolset discovery resources.
//!
//! `toolsets://` returns the full catalog; `toolsets://<name>` one
//! toolset with its effective tool list. Payloads are JSON,
//! base64-encoded per the MCP resource contract.

use crate::protocol::{ResourceContents, ResourceDefinition, ResourcesListResult, ResourcesReadResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use db2i_protocol::{McpError, McpResult};
use db2i_tools::ToolsetManager;
use serde_json::json;

pub const CATALOG_URI: &str = "toolsets://";
const MIME_JSON: &str = "application/json";

pub fn list_resources(toolsets: &ToolsetManager) -> ResourcesListResult {
    let mut resources = vec![ResourceDefinition {
        uri: CATALOG_URI.to_string(),
        name: "Toolset catalog".to_string(),
        description: Some("All toolsets with their tool lists".to_string()),
        mime_type: MIME_JSON.to_string(),
    }];
    for name in toolsets.toolset_names() {
        let title = toolsets
            .toolset(&name)
            .map(|set| set.title.clone())
            .unwrap_or_else(|| name.clone());
        resources.push(ResourceDefinition {
            uri: format!("{CATALOG_URI}{name}"),
            name: title,
            description: toolsets.toolset(&name).and_then(|set| set.description.clone()),
            mime_type: MIME_JSON.to_string(),
        });
    }
    ResourcesListResult { resources }
}

pub fn read_resource(uri: &str, toolsets: &ToolsetManager) -> McpResult<ResourcesReadResult> {
    let Some(rest) = uri.strip_prefix(CATALOG_URI) else {
        return Err(McpError::method_not_found(format!("Unknown resource: {uri}")));
    };

    let payload = if rest.is_empty() {
        let sets: Vec<_> = toolsets
            .toolset_names()
            .into_iter()
            .filter_map(|name| toolset_json(&name, toolsets))
            .collect();
        json!({ "toolsets": sets, "stats": toolsets.stats() })
    } else {
        toolset_json(rest, toolsets)
            .ok_or_else(|| McpError::method_not_found(format!("Unknown toolset: {rest}")))?
    };

    let blob = STANDARD.encode(serde_json::to_vec(&payload).map_err(|e| {
        McpError::internal(format!("Resource serialization failed: {e}"))
    })?);

    Ok(ResourcesReadResult {
        contents: vec![ResourceContents {
            uri: uri.to_string(),
            mime_type: MIME_JSON.to_string(),
            blob,
        }],
    })
}

fn toolset_json(name: &str, toolsets: &ToolsetManager) -> Option<serde_json::Value> {
    let set = toolsets.toolset(name)?;
    Some(json!({
        "name": name,
        "title": set.title,
        "description": set.description,
        "tools": toolsets.tools_in_toolset(name).unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use db2i_tools::ToolsFile;

    fn manager() -> ToolsetManager {
        let config: ToolsFile = serde_yaml::from_str(
            r#"
toolsets:
  users:
    title: Users
    description: Profile lookups
    tools: [get_user]
"#,
        )
        .unwrap();
        ToolsetManager::new(&config, vec!["describe_object".into()])
    }

    #[test]
    fn test_list_includes_catalog_and_each_toolset() {
        let result = list_resources(&manager());
        let uris: Vec<_> = result.resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec!["toolsets://", "toolsets://users"]);
    }

    #[test]
    fn test_read_catalog_round_trips_base64() {
        let result = read_resource("toolsets://", &manager()).unwrap();
        let decoded = STANDARD.decode(&result.contents[0].blob).unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(payload["toolsets"][0]["name"], "users");
        assert_eq!(payload["stats"]["total_toolsets"], 1);
    }

    #[test]
    fn test_read_single_toolset_appends_globals() {
        let result = read_resource("toolsets://users", &manager()).unwrap();
        let decoded = STANDARD.decode(&result.contents[0].blob).unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        let tools: Vec<_> = payload["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t.as_str().unwrap())
            .collect();
        assert_eq!(tools, vec!["get_user", "describe_object"]);
    }

    #[test]
    fn test_unknown_uri_rejected() {
        assert!(read_resource("files://x", &manager()).is_err());
        assert!(read_resource("toolsets://ghost", &manager()).is_err());
    }
}
