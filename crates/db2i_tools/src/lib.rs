//! YAML tool configuration: schema, environment interpolation, the tool
//! factory with its validation passes, and the toolset manager.

pub mod factory;
pub mod interpolate;
pub mod schema;
pub mod toolsets;

pub use factory::{load_tools, parse_config, ParsingResult, ProcessedTool};
pub use schema::{SecuritySection, SourceConfig, ToolConfig, ToolsFile, ToolsetConfig};
pub use toolsets::{ToolsetManager, ToolsetStats};
